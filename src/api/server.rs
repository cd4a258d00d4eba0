// Copyright (c) 2025 Rajan Panneer Selvam
//
// Licensed under the Business Source License 1.1 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.mariadb.com/bsl11
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::error::Error;
use std::sync::Arc;
use tracing::info;

use crate::api::routes;
use crate::config::Config;
use crate::controllers::test_run::TestRunController;
use crate::services::registry::TestRegistry;
use crate::services::scenario::ScriptScenarioRunner;
use crate::services::storage::FsStorage;
use crate::services::vault::ConfigVault;

pub async fn run_server(host: String, port: u16, config: Config) -> Result<(), Box<dyn Error>> {
    let addr = format!("{}:{}", host, port);

    info!("Starting Test-Probe server on http://{}", addr);

    let config = Arc::new(config);
    // Default collaborators: local-filesystem object store, config-backed
    // vault, declarative script runner. Deployments with real cloud
    // backends construct the registry themselves.
    let registry = TestRegistry::with_collaborators(
        config.clone(),
        Arc::new(FsStorage::new(config.storage.root_dir.clone())),
        Arc::new(ConfigVault::new(config.vault.credentials.clone())),
        Arc::new(ScriptScenarioRunner),
    );

    let controller = web::Data::new(TestRunController::new(registry.clone()));
    let registry_data = web::Data::new(registry.clone());
    let config_data = web::Data::new(config.clone());

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(controller.clone())
            .app_data(registry_data.clone())
            .app_data(config_data.clone())
            .configure(routes::configure)
    })
    .bind(&addr)?
    .run();

    let result = server.await;

    // The server only returns once the process is asked to stop; drain
    // every live engine before giving the Kafka clients up.
    registry.shutdown().await;

    result?;
    Ok(())
}
