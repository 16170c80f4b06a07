// Route handlers, one module per API surface.

pub mod interest;
pub mod join;
pub mod signup;
