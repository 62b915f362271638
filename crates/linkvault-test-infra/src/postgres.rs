use crate::Result;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

const POSTGRES_PORT: u16 = 5432;
const READY_MESSAGE: &str = "database system is ready to accept connections";

#[derive(Debug, Clone, TypedBuilder)]
pub struct PostgresConfig {
    #[builder(default = "linkvault".to_string(), setter(into))]
    database: String,
    #[builder(default = "linkvault".to_string(), setter(into))]
    username: String,
    #[builder(default = "linkvault".to_string(), setter(into))]
    password: String,
    #[builder(default = "16-alpine".to_string(), setter(into))]
    tag: String,
}

impl PostgresConfig {
    fn connection_url(&self, host: &str, port: u16) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, host, port, self.database
        )
    }
}

/// A disposable PostgreSQL server, removed when dropped.
///
/// The image restarts the server once after initdb, so the readiness line can
/// show up before the final server listens; connect with a short retry loop.
pub struct PostgresServer {
    _container: ContainerAsync<GenericImage>,
    database_url: String,
}

impl PostgresServer {
    pub async fn new(config: PostgresConfig) -> Result<Self> {
        // the data dies with the container, so skip fsync
        let container = GenericImage::new("postgres", config.tag.as_str())
            .with_exposed_port(POSTGRES_PORT.tcp())
            .with_wait_for(WaitFor::message_on_stderr(READY_MESSAGE))
            .with_env_var("POSTGRES_DB", config.database.as_str())
            .with_env_var("POSTGRES_USER", config.username.as_str())
            .with_env_var("POSTGRES_PASSWORD", config.password.as_str())
            .with_cmd(["postgres", "-c", "fsync=off", "-c", "synchronous_commit=off"])
            .start()
            .await?;
        let host = container.get_host().await?;
        let port = container.get_host_port_ipv4(POSTGRES_PORT).await?;

        Ok(Self {
            database_url: config.connection_url(&host.to_string(), port),
            _container: container,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}
