//! taskbus进程入口的组合根

pub mod app;
pub mod shutdown;
