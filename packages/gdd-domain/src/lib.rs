pub mod domain;
pub mod draft;
pub mod matcher;
pub mod tokens;

pub use domain::{Domain, DomainSchema, RelationField};
pub use draft::{Draft, Section};
pub use matcher::{FuzzyMatch, normalize_name};
