use clap::Parser;

/// Issue tracker REST API backed by SQLite.
#[derive(Debug, Clone, Parser)]
#[command(name = "tb", version)]
pub struct Config {
    /// Address to bind
    #[arg(long, env = "TABULA_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Store connection string: a database file path, or `:memory:`
    #[arg(long = "db", env = "TABULA_DB", default_value = "tabula.sqlite")]
    pub db: String,
}

impl Config {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
