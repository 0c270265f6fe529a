//! Host side of an ELM327 OBD-II adapter connection: byte transports, the
//! transaction layer, adapter setup and live-data polling.

pub mod config;
pub mod error;
pub mod link;
pub mod mock;
pub mod poller;
pub mod session;
pub mod setup;
pub mod tcp;
pub mod transport;

pub use config::LinkConfig;
pub use error::{LinkError, LinkResult, SetupFailure};
pub use link::AdapterLink;
pub use mock::{MockAdapter, Reply, SimulatedVehicle};
pub use poller::{PollCycle, Poller, Reading};
pub use session::ObdSession;
pub use setup::{AdapterInfo, ConnectionState, SetupMachine, SetupState, SetupStep};
pub use tcp::TcpTransport;
pub use transport::{Notification, Transport};
