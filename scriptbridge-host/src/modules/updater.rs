//! `Updater` module: lets scripts drive bundle updates.

use scriptbridge_core::{FunctionSpec, HostError, HostModule, Outcome, Param, ParamKind};
use serde_json::{Map, Value};

use crate::updater::{UpdateError, UpdateInfo, UpdateManager};

pub struct UpdaterModule {
    updater: UpdateManager,
}

impl UpdaterModule {
    pub fn new(updater: UpdateManager) -> Self {
        Self { updater }
    }
}

impl HostModule for UpdaterModule {
    fn name(&self) -> &'static str {
        "Updater"
    }

    fn functions(&self) -> Vec<FunctionSpec> {
        let check = self.updater.clone();
        let fetch = self.updater.clone();

        vec![
            FunctionSpec::new("checkForUpdates", 0, Vec::new(), move |_args| {
                let updater = check.clone();
                Outcome::pending(async move {
                    updater.check_for_updates().await.map_err(to_host_error)
                })
            }),
            FunctionSpec::new(
                "fetchBundle",
                0,
                [
                    Param::nullable("url", ParamKind::Str),
                    Param::nullable("revision", ParamKind::Str),
                ],
                move |args| {
                    let update = match (args.opt_str(0)?, args.opt_str(1)?) {
                        (Some(url), Some(revision)) => Some(UpdateInfo::new(url, revision)),
                        _ => None,
                    };
                    let updater = fetch.clone();
                    Outcome::pending(async move {
                        updater.fetch_bundle(update).await.map_err(to_host_error)
                    })
                },
            ),
        ]
    }

    fn constants(&self) -> Map<String, Value> {
        let mut constants = Map::new();
        constants.insert(
            "BUNDLE_PATH".to_string(),
            Value::String(self.updater.bundle_path().display().to_string()),
        );
        constants
    }
}

fn to_host_error(err: UpdateError) -> HostError {
    match err {
        UpdateError::Aborted(reason) => HostError::Cancelled(reason),
        other => HostError::failed(other),
    }
}
