/// Identifier of one reconciliation job; stable across resubmissions.
/// Example: `fpr-1042`
pub type JobId = String;
/// Identifier for the history source that produced a page.
/// Examples: `dhr`, `dhr::book-2`
pub type SourceId = String;
/// Composite summary key text.
/// Example: `1|1|7|3||12||401|402|2024-06-30`
pub type SummaryKey = String;
/// Single decoded key dimension value (internal id rendered as text).
/// Examples: `3`, `401`
pub type FieldValue = String;
/// Stable handle of a persisted output chunk.
/// Examples: `17`, `exports/chkSummary-fpr-1042_001.txt`
pub type ChunkHandle = String;
/// Identifier returned by the task scheduler or pipeline control for a submission.
/// Examples: `task-3`, `SCHEDSCRIPT_0143`
pub type ExecutionId = String;
/// Name of a deferred task parameter.
/// Examples: `jobId`, `nextPageIndex`
pub type ParamName = String;
/// Human-readable failure text kept in scan reports.
/// Example: `failed to fetch page 4: connection reset`
pub type LogMessage = String;
