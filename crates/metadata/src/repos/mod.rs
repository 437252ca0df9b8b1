//! Repository traits for metadata operations.

pub mod assets;
pub mod builds;
pub mod organizations;
pub mod projects;
pub mod tokens;

pub use assets::AssetRepo;
pub use builds::BuildRepo;
pub use organizations::OrganizationRepo;
pub use projects::ProjectRepo;
pub use tokens::TokenRepo;
