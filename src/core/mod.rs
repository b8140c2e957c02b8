//! Building blocks shared by the evaluation engine: errors, addresses, DNS
//! types, macro expansion and the per-check session.

mod dns;
mod error;
pub(crate) mod grammar;
mod ipaddr;
mod macros;
mod session;

pub use dns::{
    DEFAULT_RECORD_LIMIT, DnsRequest, DnsResponse, DnsService, RecordType, local_host_names,
};
pub use error::{DnsError, SpfError};
pub use ipaddr::IpAddress;
pub use macros::{ExpansionMode, MacroData, MacroExpand};
pub(crate) use macros::{on_client_domain_forward, on_client_domain_ptr};
pub use session::{MAX_DEPTH, SpfSession};
pub(crate) use session::RecordSlot;
