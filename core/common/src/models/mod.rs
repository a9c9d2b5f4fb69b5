//! Domain models for Goals, Tasks and Todos.
//!
//! Each kind contributes only its domain fields. The reconciliation shape is
//! shared through [`Record`] and [`RemoteRow`].

mod goal;
mod record;
mod repeat;
mod task;
mod todo;

pub use goal::{GoalFields, GoalOrder, GoalPatch};
pub use record::{Fields, Record, RemoteRow};
pub use repeat::{RepeatConfig, RepeatUnit};
pub use task::{Priority, TaskFields, TaskPatch};
pub use todo::{TodoFields, TodoPatch, TodoStatus};
