use std::sync::Arc;

use lookout_scanner::Scanner;

use crate::auth::jwt::JwtVerifier;

/// Shared application state available to all handlers via `State<AppState>`.
///
/// Cheaply cloneable: the scanner is `Clone` and the verifier sits behind
/// an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Scanner service backing every endpoint.
    pub scanner: Scanner,
    /// Bearer-token verifier used by the [`crate::auth::AuthUser`] extractor.
    pub verifier: Arc<JwtVerifier>,
}
