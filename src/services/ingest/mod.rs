//! Spreadsheet replace-ingestion
//!
//! An upload is decoded, parsed into typed records, assigned a single
//! customer scope and then swapped in atomically: every existing record of
//! that scope is deleted and the sheet rows are inserted in one transaction.

pub mod row_parser;
pub mod scope;
pub mod sheet;

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{ReplaceCounts, ReplaceSummary, ReplaceUploadRequest};

pub use row_parser::{parse_sheet, start_of_day, SheetRecord};
pub use scope::resolve_scope;
pub use sheet::decode_sheet;

/// Failure of a replace upload
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("No file uploaded")]
    NoFile,

    #[error("Uploaded file is {size} bytes, the limit is {limit} bytes")]
    FileTooLarge { size: usize, limit: usize },

    #[error("Could not read uploaded file: {0}")]
    InvalidFile(String),

    #[error("Sheet has no data rows")]
    NoDataRows,

    #[error("No valid {entity} rows found")]
    NoValidRows { entity: &'static str },

    #[error(
        "Sheet contains multiple customers ({}). Upload one customer at a time or pass customerName",
        .names.join(", ")
    )]
    MultipleCustomers { names: Vec<String> },

    #[error("Store did not finish within {0:?}")]
    StoreTimeout(Duration),

    #[error("Replace failed: {0:#}")]
    Store(anyhow::Error),
}

impl IngestError {
    /// Error code sent back to the caller
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::NoFile => "NO_FILE",
            IngestError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            IngestError::InvalidFile(_) => "INVALID_FILE",
            IngestError::NoDataRows => "NO_DATA_ROWS",
            IngestError::NoValidRows { .. } => "NO_VALID_ROWS",
            IngestError::MultipleCustomers { .. } => "MULTIPLE_CUSTOMERS",
            IngestError::StoreTimeout(_) => "STORE_TIMEOUT",
            IngestError::Store(_) => "DATABASE_ERROR",
        }
    }

    /// True when the upload itself is at fault rather than the store.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, IngestError::StoreTimeout(_) | IngestError::Store(_))
    }
}

/// Persistence for one record family.
///
/// `replace` must delete every record whose customer equals `scope` (every
/// record when `scope` is `None`) and insert `rows`, committing both or
/// neither.
#[async_trait]
pub trait ReplaceStore<R: SheetRecord>: Send + Sync {
    async fn replace(&self, scope: Option<&str>, rows: Vec<R>) -> anyhow::Result<ReplaceCounts>;
}

/// Limits applied to a single upload
#[derive(Debug, Clone, Copy)]
pub struct ReplaceOptions {
    pub max_upload_bytes: usize,
    pub store_timeout: Duration,
}

impl Default for ReplaceOptions {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            store_timeout: Duration::from_secs(30),
        }
    }
}

/// Attach `scope` to every row and swap the scope's records for `rows`.
pub async fn replace<R, S>(store: &S, scope: Option<String>, mut rows: Vec<R>) -> anyhow::Result<ReplaceCounts>
where
    R: SheetRecord,
    S: ReplaceStore<R> + ?Sized,
{
    for row in &mut rows {
        row.set_customer_name(scope.clone());
    }
    store.replace(scope.as_deref(), rows).await
}

/// Full pipeline: base64 upload → sheet → records → scoped replace.
pub async fn replace_from_sheet<R, S>(
    store: &S,
    upload: &ReplaceUploadRequest,
    options: ReplaceOptions,
    now: DateTime<Utc>,
) -> Result<ReplaceSummary, IngestError>
where
    R: SheetRecord,
    S: ReplaceStore<R> + ?Sized,
{
    let bytes = decode_upload(upload.file_base64.as_deref(), options.max_upload_bytes)?;
    let rows = decode_sheet(&bytes, upload.file_name.as_deref())?;
    let parsed = parse_sheet::<R>(&rows, start_of_day(now))?;

    debug!(
        entity = R::ENTITY,
        rows_read = parsed.rows_read,
        records = parsed.records.len(),
        sheet_customers = parsed.customers.len(),
        "Parsed upload"
    );

    let scope = resolve_scope(upload.customer_name.as_deref(), &parsed.customers)?;

    let counts = tokio::time::timeout(options.store_timeout, replace(store, scope.clone(), parsed.records))
        .await
        .map_err(|_| IngestError::StoreTimeout(options.store_timeout))?
        .map_err(IngestError::Store)?;

    info!(
        entity = R::ENTITY,
        customer = scope.as_deref().unwrap_or("<all>"),
        deleted = counts.deleted_count,
        inserted = counts.inserted_count,
        "Replaced records from sheet"
    );

    Ok(ReplaceSummary {
        message: format!("{} replaced successfully", R::UPLOAD_LABEL),
        customer_name: scope,
        deleted_count: counts.deleted_count,
        inserted_count: counts.inserted_count,
        rows_read: parsed.rows_read,
    })
}

/// Decode the base64 payload. A `data:` URL prefix is accepted.
fn decode_upload(encoded: Option<&str>, max_bytes: usize) -> Result<Vec<u8>, IngestError> {
    let encoded = encoded.map(str::trim).unwrap_or_default();
    let encoded = match encoded.strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map(|(_, data)| data).unwrap_or_default(),
        None => encoded,
    };
    if encoded.is_empty() {
        return Err(IngestError::NoFile);
    }

    // base64 expands by 4/3; refuse oversized payloads before allocating
    let estimated = encoded.len() / 4 * 3;
    if estimated > max_bytes.saturating_add(3) {
        return Err(IngestError::FileTooLarge { size: estimated, limit: max_bytes });
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| IngestError::InvalidFile(format!("invalid base64: {}", e)))?;

    if bytes.is_empty() {
        return Err(IngestError::NoFile);
    }
    if bytes.len() > max_bytes {
        return Err(IngestError::FileTooLarge { size: bytes.len(), limit: max_bytes });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewInfraTask, NewTask};
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory store that stages the swap and only publishes it on success
    struct MemoryStore<R> {
        rows: Mutex<Vec<R>>,
        fail_insert: AtomicBool,
        calls: AtomicUsize,
    }

    impl<R: SheetRecord + Clone> MemoryStore<R> {
        fn new(rows: Vec<R>) -> Self {
            Self {
                rows: Mutex::new(rows),
                fail_insert: AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn snapshot(&self) -> Vec<R> {
            self.rows.lock().clone()
        }
    }

    #[async_trait]
    impl<R: SheetRecord + Clone> ReplaceStore<R> for MemoryStore<R> {
        async fn replace(&self, scope: Option<&str>, rows: Vec<R>) -> anyhow::Result<ReplaceCounts> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut current = self.rows.lock();

            let (removed, mut staged): (Vec<R>, Vec<R>) = current
                .iter()
                .cloned()
                .partition(|r| scope.is_none() || r.customer_name() == scope);

            if self.fail_insert.load(Ordering::SeqCst) {
                anyhow::bail!("insert failed");
            }

            let inserted = rows.len() as u64;
            staged.extend(rows);
            *current = staged;

            Ok(ReplaceCounts {
                deleted_count: removed.len() as u64,
                inserted_count: inserted,
            })
        }
    }

    struct HangingStore;

    #[async_trait]
    impl ReplaceStore<NewInfraTask> for HangingStore {
        async fn replace(&self, _scope: Option<&str>, _rows: Vec<NewInfraTask>) -> anyhow::Result<ReplaceCounts> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ReplaceCounts { deleted_count: 0, inserted_count: 0 })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 9, 30, 0).unwrap()
    }

    fn infra(name: &str, customer: Option<&str>) -> NewInfraTask {
        NewInfraTask {
            infra_phase: "General".to_string(),
            task_name: name.to_string(),
            status: "Planned".to_string(),
            percent_complete: 0.0,
            start_date: now(),
            end_date: now(),
            owner: String::new(),
            customer_name: customer.map(str::to_string),
        }
    }

    fn upload(csv: &str, customer: Option<&str>) -> ReplaceUploadRequest {
        ReplaceUploadRequest {
            file_name: Some("plan.csv".to_string()),
            file_base64: Some(base64::engine::general_purpose::STANDARD.encode(csv)),
            customer_name: customer.map(str::to_string),
        }
    }

    const INFRA_SHEET: &str = "Infra Phase,Task Name,Status,% Complete,Start,End,Owner\n\
        Network,Install switches,In Progress,75,2021-01-01,2021-01-31,Ana\n\
        ,,,,,,\n\
        Servers,Rack servers,Planned,abc,44197,,Ben\n";

    #[tokio::test]
    async fn test_three_row_sheet_with_blank_row_inserts_two() {
        let store = MemoryStore::new(vec![infra("old", None)]);

        let summary = replace_from_sheet::<NewInfraTask, _>(&store, &upload(INFRA_SHEET, None), ReplaceOptions::default(), now())
            .await
            .unwrap();

        assert_eq!(summary.rows_read, 3);
        assert_eq!(summary.inserted_count, 2);
        assert_eq!(summary.deleted_count, 1);
        assert_eq!(summary.customer_name, None);
        assert_eq!(summary.message, "Infra Excel replaced successfully");

        let rows = store.snapshot();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].percent_complete, 0.0);
        assert_eq!(rows[1].end_date, rows[1].start_date);
    }

    #[tokio::test]
    async fn test_scoped_replace_leaves_other_customers_alone() {
        let store = MemoryStore::new(vec![
            infra("vip-1", Some("VIP")),
            infra("rw-1", Some("Routeware")),
            infra("vip-2", Some("VIP")),
        ]);

        let summary = replace_from_sheet::<NewInfraTask, _>(
            &store,
            &upload(INFRA_SHEET, Some("the vip group")),
            ReplaceOptions::default(),
            now(),
        )
        .await
        .unwrap();

        assert_eq!(summary.customer_name.as_deref(), Some("VIP"));
        assert_eq!(summary.deleted_count, 2);

        let rows = store.snapshot();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().filter(|r| r.customer_name.as_deref() == Some("Routeware")).count(), 1);
        assert_eq!(rows.iter().filter(|r| r.customer_name.as_deref() == Some("VIP")).count(), 2);
    }

    #[tokio::test]
    async fn test_unique_sheet_customer_sets_scope() {
        let store = MemoryStore::<NewInfraTask>::new(vec![]);
        let sheet = "Task Name,Customer\nA,Infinite Electronics\nB,Infinite Electronics\n";

        let summary = replace_from_sheet::<NewInfraTask, _>(&store, &upload(sheet, None), ReplaceOptions::default(), now())
            .await
            .unwrap();

        assert_eq!(summary.customer_name.as_deref(), Some("Infinite"));
        assert!(store.snapshot().iter().all(|r| r.customer_name.as_deref() == Some("Infinite")));
    }

    #[tokio::test]
    async fn test_multiple_sheet_customers_persist_nothing() {
        let store = MemoryStore::new(vec![infra("keep", Some("VIP"))]);
        let sheet = "Task Name,Customer\nA,VIP\nB,Routeware\n";

        let err = replace_from_sheet::<NewInfraTask, _>(&store, &upload(sheet, None), ReplaceOptions::default(), now())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "MULTIPLE_CUSTOMERS");
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_replace_is_idempotent() {
        let store = MemoryStore::<NewInfraTask>::new(vec![]);
        let request = upload(INFRA_SHEET, Some("Routeware"));

        replace_from_sheet::<NewInfraTask, _>(&store, &request, ReplaceOptions::default(), now())
            .await
            .unwrap();
        let first = store.snapshot();

        let second = replace_from_sheet::<NewInfraTask, _>(&store, &request, ReplaceOptions::default(), now())
            .await
            .unwrap();

        assert_eq!(second.deleted_count, 2);
        assert_eq!(store.snapshot(), first);
    }

    #[tokio::test]
    async fn test_failed_insert_keeps_prior_rows() {
        let before = vec![infra("a", Some("VIP")), infra("b", Some("VIP"))];
        let store = MemoryStore::new(before.clone());
        store.fail_insert.store(true, Ordering::SeqCst);

        let err = replace_from_sheet::<NewInfraTask, _>(&store, &upload(INFRA_SHEET, Some("VIP")), ReplaceOptions::default(), now())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "DATABASE_ERROR");
        assert!(err.to_string().contains("insert failed"));
        assert_eq!(store.snapshot(), before);
    }

    #[tokio::test]
    async fn test_store_timeout() {
        let options = ReplaceOptions {
            store_timeout: Duration::from_millis(20),
            ..Default::default()
        };

        let err = replace_from_sheet::<NewInfraTask, _>(&HangingStore, &upload(INFRA_SHEET, None), options, now())
            .await
            .unwrap_err();

        assert_eq!(err.code(), "STORE_TIMEOUT");
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_task_family_uses_its_own_headers() {
        let store = MemoryStore::<NewTask>::new(vec![]);
        let sheet = "Workstream,Deliverable,Status,Progress,Phase,Milestone,Start,End,Owner\n\
            Data,Migration plan,Done,100,Build,M1,2024-02-01,2024-02-10,Cara\n";

        let summary = replace_from_sheet::<NewTask, _>(&store, &upload(sheet, None), ReplaceOptions::default(), now())
            .await
            .unwrap();

        assert_eq!(summary.message, "Task Excel replaced successfully");
        let rows = store.snapshot();
        assert_eq!(rows[0].workstream, "Data");
        assert_eq!(rows[0].progress, 100.0);
        assert_eq!(rows[0].milestone, "M1");
    }

    #[tokio::test]
    async fn test_missing_dates_fall_back_to_request_day() {
        let store = MemoryStore::<NewInfraTask>::new(vec![]);

        replace_from_sheet::<NewInfraTask, _>(&store, &upload("Task Name\nA\n", None), ReplaceOptions::default(), now())
            .await
            .unwrap();

        let row = &store.snapshot()[0];
        assert_eq!(row.start_date, Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap());
        assert_eq!(row.end_date, row.start_date);
    }

    #[test]
    fn test_decode_upload_errors() {
        assert!(matches!(decode_upload(None, 100), Err(IngestError::NoFile)));
        assert!(matches!(decode_upload(Some("  "), 100), Err(IngestError::NoFile)));
        assert!(matches!(decode_upload(Some("!!not base64!!"), 100), Err(IngestError::InvalidFile(_))));

        let big = base64::engine::general_purpose::STANDARD.encode(vec![b'a'; 200]);
        assert!(matches!(decode_upload(Some(&big), 100), Err(IngestError::FileTooLarge { limit: 100, .. })));
    }

    #[test]
    fn test_decode_upload_accepts_data_url() {
        let encoded = format!(
            "data:text/csv;base64,{}",
            base64::engine::general_purpose::STANDARD.encode("a,b\n")
        );
        assert_eq!(decode_upload(Some(&encoded), 100).unwrap(), b"a,b\n");
    }

    #[test]
    fn test_error_codes_and_classes() {
        assert_eq!(IngestError::NoDataRows.code(), "NO_DATA_ROWS");
        assert_eq!(IngestError::NoValidRows { entity: "Task" }.code(), "NO_VALID_ROWS");
        assert!(IngestError::InvalidFile("x".into()).is_client_error());
        assert!(!IngestError::Store(anyhow::anyhow!("boom")).is_client_error());

        let err = IngestError::MultipleCustomers {
            names: vec!["A".to_string(), "B".to_string()],
        };
        assert!(err.to_string().contains("A, B"));
    }
}
