use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::db::connection::build_config;
use crate::db::instance::InstanceDescriptor;
use crate::error::{AppError, ErrorKind};

pub type MssqlClient = tiberius::Client<Compat<TcpStream>>;

/// Connect to SQL Server using a parsed instance descriptor.
///
/// # Errors
///
/// Returns a `Config` error when the descriptor cannot be turned into a login, and
/// a `Connection` error if DNS resolution, TCP connect, or login fails, or if the
/// configured timeout elapses during connect or login.
pub async fn connect(descriptor: &InstanceDescriptor) -> Result<MssqlClient> {
    let config = build_config(descriptor)
        .map_err(|err| AppError::new(ErrorKind::Config, err.to_string()))?;
    let timeout_duration = if descriptor.connect_timeout_ms == 0 {
        None
    } else {
        Some(Duration::from_millis(descriptor.connect_timeout_ms))
    };

    // `timeout` wraps the future in an outer Result for Elapsed vs IO errors.
    let tcp = if let Some(duration) = timeout_duration {
        timeout(duration, TcpStream::connect(config.get_addr()))
            .await
            .map_err(|_| {
                AppError::new(
                    ErrorKind::Connection,
                    format!(
                        "Connection to {} timed out after {} ms",
                        descriptor, descriptor.connect_timeout_ms
                    ),
                )
            })?
            .map_err(|err| AppError::new(ErrorKind::Connection, err.to_string()))?
    } else {
        TcpStream::connect(config.get_addr())
            .await
            .map_err(|err| AppError::new(ErrorKind::Connection, err.to_string()))?
    };
    tcp.set_nodelay(true)
        .map_err(|err| AppError::new(ErrorKind::Connection, err.to_string()))?;
    let client = if let Some(duration) = timeout_duration {
        timeout(duration, tiberius::Client::connect(config, tcp.compat_write()))
            .await
            .map_err(|_| {
                AppError::new(
                    ErrorKind::Connection,
                    format!(
                        "Login to {} timed out after {} ms",
                        descriptor, descriptor.connect_timeout_ms
                    ),
                )
            })?
            .map_err(|err| AppError::new(ErrorKind::Connection, err.to_string()))?
    } else {
        tiberius::Client::connect(config, tcp.compat_write())
            .await
            .map_err(|err| AppError::new(ErrorKind::Connection, err.to_string()))?
    };
    Ok(client)
}
