mod registry;
mod run;
mod task;
mod workflow;

pub use self::registry::*;
pub use self::run::*;
pub use self::task::*;
pub use self::workflow::*;

use chrono::{DateTime, Utc};

/// Current wall-clock time, used anywhere a model needs to stamp `created_at`/`updated_at`.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
