pub(crate) mod frame;
pub(crate) mod server;
pub(crate) mod special;
pub(crate) mod tls;
