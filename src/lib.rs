pub mod model;

#[cfg(feature = "server")]
pub mod config;
#[cfg(feature = "server")]
pub mod node;
#[cfg(feature = "server")]
pub mod server;

pub mod prelude {
    pub use crate::model::Envelope;
    pub use crate::model::HistoryStore;
    pub use crate::model::LinkStatus;
    pub use crate::model::NodeId;
    pub use crate::model::PathRecord;
    pub use crate::model::Payload;
    pub use crate::model::RelayError;
    pub use crate::model::SessionAuthority;
    pub use crate::model::SessionToken;
    pub use crate::model::Settings;
    pub use crate::model::SettingsPatch;
}
