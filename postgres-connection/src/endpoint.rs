use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

/// Database connection endpoint configuration
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct Endpoint {
    /// user to connect as
    pub user: String,
    /// password for the user
    pub password: String,
    /// database to connect to
    pub database: String,
    host: IpAddr,
    port: u16,
}

impl Endpoint {
    /// Create a new endpoint from its constituent parts
    pub fn new(user: String, password: String, database: String, host: IpAddr, port: u16) -> Self {
        Self {
            user,
            password,
            database,
            host,
            port,
        }
    }

    /// The socket address of the endpoint
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Endpoint")
            .field("user", &self.user)
            .field("password", &"******")
            .field("database", &self.database)
            .field("host", &self.host)
            .field("port", &self.port)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::Endpoint;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn debug_output_redacts_passwords() {
        let endpoint = Endpoint::new(
            "postgres".to_string(),
            "hunter2".to_string(),
            "postgres".to_string(),
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            5432,
        );

        let debugged = format!("{endpoint:?}");

        assert!(!debugged.contains("hunter2"));
        assert!(debugged.contains("******"));
    }
}
