pub mod logging;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod test_server;
