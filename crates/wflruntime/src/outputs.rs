use std::sync::Arc;
use wflcore::{OutputTransfer, ProvisionFailure, ProvisionReport};

use crate::transfer::TransferRegistry;

/// Copies or uploads registered outputs to their destinations
#[derive(Clone)]
pub struct OutputProvisioner {
    transfers: Arc<TransferRegistry>,
}

impl OutputProvisioner {
    pub fn new(transfers: Arc<TransferRegistry>) -> Self {
        Self { transfers }
    }

    /// Attempt every transfer. Failures are collected, never short-circuited.
    pub async fn provision(&self, transfers: Vec<OutputTransfer>) -> ProvisionReport {
        let mut report = ProvisionReport::default();
        if transfers.is_empty() {
            tracing::info!("No output files to provision");
            return report;
        }

        tracing::info!("Provisioning {} output file(s) to their final destinations", transfers.len());
        for transfer in transfers {
            let target = transfer.destination.url.clone();
            let Some(plugin) = self.transfers.for_location(&target) else {
                tracing::warn!("No transfer plugin for {}", target);
                report.failed.push(ProvisionFailure {
                    name: transfer.name.clone(),
                    target,
                    reason: "no transfer plugin handles this location".to_string(),
                });
                continue;
            };

            match plugin.upload(&transfer.source, &transfer.destination).await {
                Ok(()) => {
                    tracing::info!("Provisioned #{} from {} to {}", transfer.name, transfer.source.display(), target);
                    report.succeeded.push(transfer);
                }
                Err(e) => {
                    tracing::error!("Failed to provision #{} to {}: {}", transfer.name, target, e);
                    report.failed.push(ProvisionFailure {
                        name: transfer.name.clone(),
                        target,
                        reason: e.to_string(),
                    });
                }
            }
        }
        report
    }
}
