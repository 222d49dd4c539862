//! Audited mutations
//!
//! Every create, update and delete that goes through this module produces
//! exactly one [`ChangeEvent`], written in the same transaction as the
//! mutation itself.
//!
//! - `context`: who is acting, and the caller's cancellation/deadline
//! - `event`: change events and their column mapping
//! - `recorder`: where events go (`SqlRecorder`, `MemoryRecorder`)
//! - `command`: command contracts and the orchestration functions
//! - `adapter`: entity-level commands implemented for every backend
//! - `log`: reading events back

pub mod adapter;
pub mod command;
pub mod context;
pub mod event;
pub mod log;
pub mod recorder;

pub use adapter::{DeleteEntity, Entity, InsertEntity, Mutation, Precondition, UpdateEntity};
pub use command::{
    Audited, AuditedCommand, CreateCommand, DeleteCommand, UpdateCommand, create, delete, update,
};
pub use context::{AuditContext, ExecContext};
pub use event::{CHANGE_EVENTS_TABLE, Change, ChangeEvent, Operation};
pub use log::ChangeEventLog;
pub use recorder::{MemoryRecorder, Recorder, SqlRecorder};
