mod integration_tests {
    pub mod connection_handshake;
    pub mod prepared_cache_concurrency;
}
