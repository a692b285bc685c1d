pub mod principal;

pub use principal::{AdminPrincipal, CurrentPrincipal};
