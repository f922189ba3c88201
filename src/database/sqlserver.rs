// SQL Server connections over tiberius
//
// tiberius speaks futures-io, so the tokio TcpStream is wrapped with the
// tokio-util compat layer. Connections are opened per use and closed on drop.

use tiberius::{Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::database::manager::DatabaseError;

pub type SqlServerClient = Client<Compat<TcpStream>>;

/// Open a fresh SQL Server connection from an ADO.NET style connection string
pub async fn connect(connection_string: &str) -> Result<SqlServerClient, DatabaseError> {
    let config = Config::from_ado_string(connection_string)
        .map_err(|e| DatabaseError::InvalidConnectionString(e.to_string()))?;

    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;

    let client = Client::connect(config, tcp.compat_write()).await?;
    Ok(client)
}
