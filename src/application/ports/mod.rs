pub mod connectivity;
pub mod durable_store;
pub mod remote_store;

pub use connectivity::{ConnectivityEvent, ConnectivityProbe, ConnectivitySource};
pub use durable_store::LocalDurableStore;
pub use remote_store::{MergeWrite, RemoteDocument, RemoteDocumentStore, RemoteStoreError};
