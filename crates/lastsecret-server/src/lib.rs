pub mod error;
pub mod handlers;
pub mod server;
pub mod store;
pub mod vault;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub vault: vault::Vault,
    /// Base for absolute share URLs; relative `/s/{id}` paths when unset.
    pub public_url: Option<String>,
}

pub use error::VaultError;
pub use server::{open_store, resolve_data_dir, router, run, ServerConfig, StoreBackend};
pub use vault::{Submitted, Vault};
