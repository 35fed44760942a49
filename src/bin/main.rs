// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use consult_ledger::api::{AppState, create_router};
use consult_ledger::{Config, Engine};
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt as _, util::SubscriberInitExt as _};

/// Consult Ledger - points ledger service
///
/// Serves wallets, consultations, transfers and moderated deposit/withdraw
/// requests over HTTP. Settings not given on the command line are read from
/// `LEDGER_*` environment variables.
#[derive(Parser, Debug)]
#[command(name = "consult-ledger")]
#[command(about = "Points ledger for a consultation marketplace", long_about = None)]
struct Args {
    /// Address to listen on (overrides LEDGER_LISTEN_ADDR)
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    info!(
        listen = %config.listen_addr,
        commission_rate = %config.commission_rate,
        tx_code_length = config.tx_code_length,
        "starting"
    );

    let listen_addr = config.listen_addr;
    let state = AppState {
        engine: Arc::new(Engine::with_config(config)),
    };
    let app = create_router(state);

    let listener = match TcpListener::bind(listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("could not bind {listen_addr}: {e}");
            process::exit(1);
        }
    };
    info!("ledger API listening on http://{listen_addr}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {e}");
        process::exit(1);
    }
}
