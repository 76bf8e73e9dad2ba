pub mod connectivity;
pub mod http_transport;
pub mod persistent_store;

pub use connectivity::ConnectivityObserver;
pub use http_transport::{
    HttpRequest, HttpResponse, HttpTransport, MultipartBody, RequestBody, TransportError,
};
pub use persistent_store::PersistentStore;
