pub mod db;
pub mod jwt;

pub use db::DbAdapter;
pub use jwt::JwtTokenAdapter;
