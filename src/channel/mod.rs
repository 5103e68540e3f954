//! Blocking channels for OS-thread communication.
//!
//! A [`Channel`] is a single shared handle: every clone can both send and
//! receive. Capacity picks the mode:
//!
//! - **Rendezvous** (`capacity == 0`): a send completes only once a receiver
//!   has taken the value.
//! - **Bounded** (`capacity > 0`): a FIFO queue; send blocks only while full.
//!
//! # Readiness and waiters
//!
//! [`Channel::can_send`] and [`Channel::can_recv`] report whether the
//! matching non-blocking operation would make progress right now. Together
//! with the waiter registration API they let [`crate::select`] wait on many
//! channels at once without busy polling.
//!
//! # Example
//!
//! ```
//! use cspsync::Channel;
//! use std::thread;
//!
//! let ch = Channel::new(0);
//! let tx = ch.clone();
//! let producer = thread::spawn(move || {
//!     for i in 0..3 {
//!         tx.send(i).unwrap();
//!     }
//!     tx.close();
//! });
//!
//! let got: Vec<i32> = ch.iter().collect();
//! assert_eq!(got, vec![0, 1, 2]);
//! producer.join().unwrap();
//! ```

mod chan;
pub mod error;
pub mod waiter;

pub use chan::{Channel, IntoIter, Iter, TryIter};
pub use error::{RecvTimeoutError, SendError, TryRecvError, TrySendError};
pub use waiter::{Waiter, WaiterKey};
