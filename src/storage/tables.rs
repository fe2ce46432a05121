use redb::TableDefinition;

/// Sessions: sha256(secret) hex -> Session (msgpack)
pub const SESSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("sessions");

/// Role assignments: user id -> msgpack Vec of role names
pub const USER_ROLES: TableDefinition<u64, &[u8]> = TableDefinition::new("user_roles");

/// Submissions: submission id -> SubmissionRecord (msgpack)
pub const SUBMISSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("submissions");

/// Owner index: user id -> msgpack Vec of submission ids
pub const USER_SUBMISSIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("user_submissions");

/// Submission files: file id -> SubmissionFileRecord (msgpack)
pub const SUBMISSION_FILES: TableDefinition<u64, &[u8]> = TableDefinition::new("submission_files");

/// Checksum index: sha256 hex -> file id (duplicate detection)
pub const FILE_CHECKSUMS: TableDefinition<&str, u64> = TableDefinition::new("file_checksums");

/// Comments: comment id -> CommentRecord (msgpack)
pub const COMMENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("comments");

/// Curation meta reported by the validator: file id -> CurationMeta (msgpack)
pub const CURATION_META: TableDefinition<u64, &[u8]> = TableDefinition::new("curation_meta");

/// Per-submission summary rebuilt by the recompute job: submission id -> SubmissionSummary
pub const SUBMISSION_CACHE: TableDefinition<u64, &[u8]> = TableDefinition::new("submission_cache");

/// Ingested archives: archive id -> ArchiveRecord (msgpack)
pub const ARCHIVES: TableDefinition<u64, &[u8]> = TableDefinition::new("archives");

/// Indexed archive listings: archive id -> msgpack Vec<ArchiveEntry>
pub const ARCHIVE_CONTENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("archive_contents");

/// Id counters: sequence name -> last issued id
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Upload chunks: (upload key, chunk index) -> payload bytes
pub const UPLOAD_CHUNKS: TableDefinition<(&str, u64), &[u8]> = TableDefinition::new("upload_chunks");
