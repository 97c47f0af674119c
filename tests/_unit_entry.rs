mod unit_tests {
    pub mod cluster_config;
}
