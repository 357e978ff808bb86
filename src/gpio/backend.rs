//! GPIO backends
//!
//! The event loop talks to a `GpioBackend` trait object so the rest of
//! the system is identical on the target board and on development
//! hosts. The real backend (rppal, `rpi-gpio` feature) configures
//! pulled-up inputs with falling-edge interrupts; the mock backend is
//! a no-op line store that tests inject edges into.
//!
//! Backend callbacks must do nothing but forward the edge on the
//! channel; every policy decision happens in the dispatcher task.

use crate::error::Result;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// A falling edge observed on a claimed line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub pin: u8,
}

pub trait GpioBackend: Send + Sync {
    /// Claim `pin` as a pulled-up input and deliver falling edges to
    /// `events`, debounced by `bounce` in hardware/library.
    fn claim(&self, pin: u8, bounce: Duration, events: UnboundedSender<Edge>) -> Result<()>;

    /// Current line state; `Some(true)` when the line reads LOW
    /// (button pressed), `None` for unclaimed pins.
    fn is_pressed(&self, pin: u8) -> Option<bool>;

    /// Cancel edge delivery and release every claimed line.
    fn release_all(&self);
}

// ============================================================
// Mock backend (development hosts and tests)
// ============================================================

#[derive(Default)]
struct MockInner {
    claimed: std::collections::HashMap<u8, UnboundedSender<Edge>>,
    pressed: std::collections::HashMap<u8, bool>,
}

/// In-memory backend; claims always succeed, edges are injected by
/// tests. No hardware debounce is simulated, which is exactly what the
/// cooldown tests need.
#[derive(Default)]
pub struct MockBackend {
    inner: std::sync::Mutex<MockInner>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a falling edge on `pin`. Unclaimed pins are ignored.
    pub fn inject_edge(&self, pin: u8) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = inner.claimed.get(&pin) {
            let _ = tx.send(Edge { pin });
        }
    }

    /// Set the simulated line state for `is_pressed` reads.
    pub fn set_pressed(&self, pin: u8, pressed: bool) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.pressed.insert(pin, pressed);
    }
}

impl GpioBackend for MockBackend {
    fn claim(&self, pin: u8, _bounce: Duration, events: UnboundedSender<Edge>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.claimed.insert(pin, events);
        inner.pressed.entry(pin).or_insert(false);
        Ok(())
    }

    fn is_pressed(&self, pin: u8) -> Option<bool> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.claimed.contains_key(&pin) {
            inner.pressed.get(&pin).copied()
        } else {
            None
        }
    }

    fn release_all(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.claimed.clear();
        inner.pressed.clear();
    }
}

// ============================================================
// rppal backend (Raspberry Pi class boards)
// ============================================================

#[cfg(feature = "rpi-gpio")]
pub use rpi::RppalBackend;

#[cfg(feature = "rpi-gpio")]
mod rpi {
    use super::{Edge, GpioBackend};
    use crate::error::{Error, Result};
    use rppal::gpio::{Gpio, InputPin, Trigger};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;

    pub struct RppalBackend {
        gpio: Gpio,
        pins: Mutex<HashMap<u8, InputPin>>,
    }

    impl RppalBackend {
        pub fn new() -> Result<Self> {
            let gpio = Gpio::new().map_err(|e| Error::Gpio(format!("gpio open: {}", e)))?;
            Ok(Self {
                gpio,
                pins: Mutex::new(HashMap::new()),
            })
        }

        fn arm(
            pin: &mut InputPin,
            bounce: Duration,
            events: UnboundedSender<Edge>,
        ) -> std::result::Result<(), rppal::gpio::Error> {
            let number = pin.pin();
            pin.set_async_interrupt(Trigger::FallingEdge, Some(bounce), move |_| {
                // Library-owned callback context: forward and return
                let _ = events.send(Edge { pin: number });
            })
        }
    }

    impl GpioBackend for RppalBackend {
        fn claim(&self, pin: u8, bounce: Duration, events: UnboundedSender<Edge>) -> Result<()> {
            let mut input = self
                .gpio
                .get(pin)
                .map_err(|e| Error::Gpio(format!("pin {}: {}", pin, e)))?
                .into_input_pullup();

            if Self::arm(&mut input, bounce, events.clone()).is_err() {
                // Stale detection left armed by a previous claim:
                // clear and re-arm once instead of failing the line
                let _ = input.clear_async_interrupt();
                Self::arm(&mut input, bounce, events)
                    .map_err(|e| Error::Gpio(format!("pin {} interrupt: {}", pin, e)))?;
                tracing::warn!(pin = pin, "Cleared stale edge detection and re-armed");
            }

            let mut pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
            pins.insert(pin, input);
            Ok(())
        }

        fn is_pressed(&self, pin: u8) -> Option<bool> {
            let pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
            pins.get(&pin).map(|p| p.is_low())
        }

        fn release_all(&self) {
            let mut pins = self.pins.lock().unwrap_or_else(|e| e.into_inner());
            for (_, mut pin) in pins.drain() {
                let _ = pin.clear_async_interrupt();
                // Dropping the pin releases the line
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn mock_delivers_edges_on_claimed_pins_only() {
        let backend = MockBackend::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        backend.inject_edge(18); // not yet claimed, dropped
        backend
            .claim(18, Duration::from_millis(300), tx)
            .unwrap();
        backend.inject_edge(18);

        let edge = rx.recv().await.unwrap();
        assert_eq!(edge.pin, 18);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn mock_pin_state_reads() {
        let backend = MockBackend::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        backend.claim(19, Duration::from_millis(300), tx).unwrap();

        assert_eq!(backend.is_pressed(19), Some(false));
        backend.set_pressed(19, true);
        assert_eq!(backend.is_pressed(19), Some(true));
        assert_eq!(backend.is_pressed(20), None);

        backend.release_all();
        assert_eq!(backend.is_pressed(19), None);
    }
}
