// repro-domain library entry point
pub mod buildspec;
pub mod error;
pub mod jdk;
pub mod package;
pub mod scmurl;
pub mod tagmatch;

pub use buildspec::{BuildResult, BuildSpec, Newline};
pub use error::DomainError;
pub use package::PackageId;
pub use scmurl::RepoCoords;
