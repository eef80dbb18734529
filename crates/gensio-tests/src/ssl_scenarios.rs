//! TLS client-authentication scenarios.
//!
//! The accepter demands a client certificate signed by its CA. Connectors
//! present no certificate, a certificate from an unrelated CA, or a valid
//! one. Rejections may be noticed first by either side, so the failing
//! cases only require that both sides fail as an authentication failure.
