//! Document provisioning.
//!
//! Creates the target documents one after another before any row is
//! written. Creation failures abort the request; sharing failures only log.

use chrono::Local;

use crate::error::PipelineError;
use crate::models::DocumentPlan;
use crate::traits::DocumentService;

/// How documents are created and shared.
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    pub title_prefix: String,
    pub share_publicly: bool,
}

/// Create `count` documents sized `rows × cols` and return their ids in
/// creation order.
///
/// Not idempotent: every call creates new documents. If creating document
/// `i` fails, the documents created before it are abandoned and the error
/// is returned without retrying.
pub async fn provision_documents(
    service: &dyn DocumentService,
    count: usize,
    rows: usize,
    cols: usize,
    options: &ProvisionOptions,
) -> Result<DocumentPlan, PipelineError> {
    let stamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let mut ids = Vec::with_capacity(count);

    for index in 1..=count {
        let title = format!("{} {} - {}", options.title_prefix, stamp, index);

        let id = service
            .create(&title, rows, cols)
            .await
            .map_err(|source| {
                tracing::error!("error creating spreadsheet {}: {:#}", index, source);
                PipelineError::Provisioning { index, source }
            })?;

        if options.share_publicly {
            if let Err(e) = service.share(&id).await {
                tracing::warn!(document = %id, "error making spreadsheet public: {:#}", e);
            }
        }

        tracing::info!(document = %id, %title, "created spreadsheet");
        ids.push(id);
    }

    DocumentPlan::new(ids).ok_or_else(|| {
        PipelineError::InvalidInput("at least one document must be provisioned".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::RangeAddress;
    use crate::models::CellMatrix;
    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FlakyService {
        fail_create_at: Option<usize>,
        fail_share: bool,
        created: Mutex<Vec<(String, usize, usize)>>,
        shared: Mutex<Vec<String>>,
    }

    impl FlakyService {
        fn new(fail_create_at: Option<usize>, fail_share: bool) -> Self {
            Self {
                fail_create_at,
                fail_share,
                created: Mutex::new(Vec::new()),
                shared: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl DocumentService for FlakyService {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn create(&self, title: &str, rows: usize, cols: usize) -> Result<String> {
            let mut created = self.created.lock().unwrap();
            if Some(created.len() + 1) == self.fail_create_at {
                bail!("quota exceeded");
            }
            created.push((title.to_string(), rows, cols));
            Ok(format!("id-{}", created.len()))
        }

        async fn share(&self, id: &str) -> Result<()> {
            if self.fail_share {
                bail!("permission denied");
            }
            self.shared.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn write_range(&self, _: &str, _: &RangeAddress, _: &CellMatrix) -> Result<()> {
            Ok(())
        }

        fn document_url(&self, id: &str) -> String {
            id.to_string()
        }
    }

    fn options(share: bool) -> ProvisionOptions {
        ProvisionOptions {
            title_prefix: "CSV Import".to_string(),
            share_publicly: share,
        }
    }

    #[tokio::test]
    async fn creates_in_order_and_shares() {
        let svc = FlakyService::new(None, false);
        let plan = provision_documents(&svc, 3, 500, 8, &options(true)).await.unwrap();
        assert_eq!(plan.ids(), &["id-1", "id-2", "id-3"]);
        assert_eq!(*svc.shared.lock().unwrap(), vec!["id-1", "id-2", "id-3"]);

        let created = svc.created.lock().unwrap();
        assert!(created[0].0.starts_with("CSV Import "));
        assert!(created[0].0.ends_with(" - 1"));
        assert!(created[2].0.ends_with(" - 3"));
        assert!(created.iter().all(|(_, r, c)| *r == 500 && *c == 8));
    }

    #[tokio::test]
    async fn share_failure_is_not_fatal() {
        let svc = FlakyService::new(None, true);
        let plan = provision_documents(&svc, 2, 10, 2, &options(true)).await.unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[tokio::test]
    async fn sharing_can_be_disabled() {
        let svc = FlakyService::new(None, false);
        provision_documents(&svc, 2, 10, 2, &options(false)).await.unwrap();
        assert!(svc.shared.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_failure_aborts() {
        let svc = FlakyService::new(Some(2), false);
        let err = provision_documents(&svc, 3, 10, 2, &options(true))
            .await
            .unwrap_err();
        match err {
            PipelineError::Provisioning { index, .. } => assert_eq!(index, 2),
            other => panic!("unexpected error: {}", other),
        }
        // No retry and no further creations.
        assert_eq!(svc.created.lock().unwrap().len(), 1);
    }
}
