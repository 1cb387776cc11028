#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Shared types for the async HTTP reactor: the callback-args value set and
//! the external-collaborator contracts the reactor is built against.

mod callback_args;
mod contracts;

pub use callback_args::{CallbackArgs, CallbackArgsError};
pub use contracts::JobQueue;
