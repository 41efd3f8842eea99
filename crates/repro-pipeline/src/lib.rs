//! repro-pipeline
//!
//! Las cuatro etapas batch del pipeline de verificación de builds
//! reproducibles, en orden de consumo:
//!
//! 1. `extract`: parsea hosts de las URLs declaradas en los POMs.
//! 2. `verify`: sondea variantes de URL contra el remoto (`git ls-remote`).
//! 3. `resolve`: resuelve tag/release correspondiente a la versión publicada
//!    vía la API GraphQL de GitHub, bajo presupuesto de rate limit.
//! 4. `build` + `compare`: sintetiza buildspecs, ejecuta el driver externo y
//!    compara los archives resultantes miembro a miembro.
//!
//! Todas las etapas se comunican exclusivamente a través del warehouse
//! (`repro-persistence`); cada una es re-ejecutable desde estado persistido.
//! Ninguna falla por-paquete aborta un batch: se registra y se sigue.

pub mod compare;
pub mod error;
pub mod extract;
pub mod github;
pub mod orchestrate;
pub mod recipe;
pub mod resolve;
pub mod verify;

pub use compare::ArtifactComparator;
pub use error::PipelineError;
pub use extract::HostExtractor;
pub use orchestrate::{BuildOrchestrator, BuilderConfig};
pub use resolve::TagResolver;
pub use verify::HostVerifier;
