/// External data source clients.
///
/// Submodules:
/// - `wilson` — Wilson Parking mobile API client (availability + metadata).

pub mod wilson;
