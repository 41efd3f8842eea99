//! repro-persistence
//!
//! Capa Postgres (Diesel) del pipeline de verificación de builds
//! reproducibles. El warehouse relacional es la única fuente de verdad entre
//! etapas: cada etapa lee su input y persiste su output aquí, nunca pasa
//! estado en memoria a la siguiente.
//!
//! Módulos:
//! - `pg`: pool r2d2, provider de conexiones y operaciones del warehouse
//!   (hosts, tags, builds, jar_reproducibility, errors).
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel declaradas para compilar queries.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;
pub mod schema;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_pool_from_env, ConnectionProvider, HostRow, PgPool, PoolProvider, UrlSlot, Warehouse};
