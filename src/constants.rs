/// Constants used by the execution budget guard.
pub mod budget {
    /// Wall-clock allowance per execution before a checkpoint is forced (45 minutes).
    pub const TIME_LIMIT_MS: u64 = 2_700_000;
    /// Usage units kept in reserve so a checkpoint can still be written.
    pub const USAGE_RESERVE: i64 = 1000;
}

/// Constants describing the composite summary key layout.
pub mod keys {
    /// Separator between key fields.
    pub const KEY_DELIMITER: char = '|';
    /// Exact number of fields a well-formed key carries.
    pub const KEY_FIELD_COUNT: usize = 10;
    /// Date format used by the period-date field.
    pub const PERIOD_DATE_FORMAT: &str = "%Y-%m-%d";

    /// Field position of the subsidiary id.
    pub const FIELD_SUBSIDIARY: usize = 0;
    /// Field position of the accounting book id.
    pub const FIELD_BOOK: usize = 1;
    /// Field position of the asset type id.
    pub const FIELD_ASSET_TYPE: usize = 2;
    /// Field position of the department id.
    pub const FIELD_DEPARTMENT: usize = 3;
    /// Field position of the class id.
    pub const FIELD_CLASS: usize = 4;
    /// Field position of the location id.
    pub const FIELD_LOCATION: usize = 5;
    /// Field position of the project id.
    pub const FIELD_PROJECT: usize = 6;
    /// Field position of the depreciation account id.
    pub const FIELD_DEPRECIATION_ACCOUNT: usize = 7;
    /// Field position of the charge account id.
    pub const FIELD_CHARGE_ACCOUNT: usize = 8;
    /// Field position of the period date.
    pub const FIELD_PERIOD_DATE: usize = 9;
}

/// Constants used by the paged history scan.
pub mod scan {
    /// Records per page requested from the history query.
    pub const PAGE_SIZE: usize = 1000;
    /// Marker carried by placeholder history names that never get a summary.
    pub const DEFAULT_NAME_MARKER: &str = "dhr-default-name";
}

/// Constants used by the summary index lookup.
pub mod index {
    /// Maximum number of distinct summary names fetched per page query.
    ///
    /// Per-page cardinality is bounded by the filter dimensions, so results
    /// stay under this cap in practice.
    pub const RESULT_CAP: usize = 1000;
}

/// Constants used by chunk output.
pub mod chunks {
    /// Maximum byte length of one chunk's contents (10 MB).
    pub const CHUNK_CAPACITY: usize = 10 * 1_000_000;
    /// Separator between keys inside chunk contents.
    pub const CHUNK_DELIMITER: char = ',';
    /// Name prefix for created chunk files.
    pub const CHUNK_FILE_PREFIX: &str = "chkSummary";
    /// Minimum digit count of the chunk sequence number in file names.
    pub const CHUNK_SEQ_WIDTH: usize = 3;
    /// File extension for created chunks.
    pub const CHUNK_FILE_EXTENSION: &str = "txt";
}

/// Constants used for checkpoint parameters and deferred resubmission.
pub mod checkpoint {
    /// Parameter carrying the job id.
    pub const PARAM_JOB_ID: &str = "jobId";
    /// Parameter carrying the serialized scan parameters.
    pub const PARAM_SCAN_PARAMS: &str = "paramsJson";
    /// Parameter carrying the next page index to process.
    pub const PARAM_NEXT_PAGE: &str = "nextPageIndex";
    /// Parameter carrying the comma-joined chunk handle list.
    pub const PARAM_CHUNK_HANDLES: &str = "chunkHandles";
    /// Parameter carrying failures recorded by earlier executions (JSON list).
    pub const PARAM_FAILURES: &str = "scanFailures";
    /// Separator used when joining chunk handles into one parameter.
    pub const HANDLE_LIST_DELIMITER: char = ',';
    /// Characters a job id may not contain; job ids end up inside chunk
    /// names and the joined handle list.
    pub const RESERVED_JOB_ID_CHARS: [char; 3] = [HANDLE_LIST_DELIMITER, '/', '\\'];
    /// Default script id the reconciliation task is resubmitted under.
    pub const DEFAULT_SCRIPT_ID: &str = "customscript_fam_checksummaries_ss";
    /// Default deployment id the reconciliation task is resubmitted under.
    pub const DEFAULT_DEPLOYMENT_ID: &str = "customdeploy_fam_checksummaries_ss";
}

/// Constants used by the file-backed task queue.
pub mod task_queue {
    /// Version tag for persisted task records.
    pub const TASK_RECORD_VERSION: u8 = 1;
    /// Prefix marker for bitcode-encoded payloads.
    pub const BITCODE_PREFIX: u8 = b'B';
    /// Extension of persisted task record files.
    pub const TASK_FILE_EXTENSION: &str = "task";
}
