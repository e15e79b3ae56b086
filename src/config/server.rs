use std::net::SocketAddr;

use super::Config;

impl Config {
    /// Address the HTTP server binds to. A bare port means loopback.
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        let bind = self.bind_address.trim();
        if !bind.is_empty() && bind.chars().all(|c| c.is_ascii_digit()) {
            return format!("127.0.0.1:{bind}").parse();
        }
        bind.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_addr() {
        let mut config = Config::default();
        assert_eq!(config.socket_addr().unwrap().port(), 8000);

        config.bind_address = "9090".to_string();
        assert_eq!(config.socket_addr().unwrap().to_string(), "127.0.0.1:9090");

        config.bind_address = "0.0.0.0:80".to_string();
        assert_eq!(config.socket_addr().unwrap().port(), 80);

        config.bind_address = "nonsense".to_string();
        assert!(config.socket_addr().is_err());
    }
}
