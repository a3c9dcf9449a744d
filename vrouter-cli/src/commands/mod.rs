pub mod manifest;
pub mod routes;
pub mod run;
