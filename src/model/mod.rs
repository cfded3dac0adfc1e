pub mod constants;
mod envelope;
mod error;
mod history;
mod path_record;
mod payload;
mod settings;
mod token;

pub use envelope::{now_millis, Envelope, NodeId};
pub use error::{RelayError, Result};
pub use history::HistoryStore;
pub use path_record::{Frame, PathRecord};
pub use payload::{LinkStatus, Payload};
pub use settings::{Settings, SettingsPatch};
pub use token::{SessionAuthority, SessionToken};
