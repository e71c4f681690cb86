/// Database layer
///
/// - `pool`: PostgreSQL connection pool management with health checks
/// - `migrations`: embedded migration runner
///
/// Models live in the `models` module at crate root level.

pub mod migrations;
pub mod pool;
