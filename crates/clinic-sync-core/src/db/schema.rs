//! SQLite schema definition.

/// Complete database schema for the local record mirror.
///
/// Relationships between tables are soft references: no foreign keys and no
/// cascades. Every syncable table carries the same bookkeeping columns:
/// `last_modified` (RFC 3339 text), `is_deleted` (0/1) and the local-only
/// `synced_at` (NULL until the server has acknowledged the row).
pub const SCHEMA: &str = r#"
-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT,
    date_of_birth TEXT,
    gender TEXT,
    phone TEXT,
    email TEXT,
    address TEXT,
    medical_history TEXT,
    last_modified TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_patients_owner ON patients(owner_id);
CREATE INDEX IF NOT EXISTS idx_patients_last_modified ON patients(last_modified);

-- ============================================================================
-- Visits
-- ============================================================================

CREATE TABLE IF NOT EXISTS visits (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    patient_id TEXT,                             -- soft reference to patients(id)
    visit_date TEXT,
    reason TEXT,
    diagnosis TEXT,
    notes TEXT,
    follow_up_date TEXT,
    last_modified TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_visits_owner ON visits(owner_id);
CREATE INDEX IF NOT EXISTS idx_visits_patient ON visits(patient_id);
CREATE INDEX IF NOT EXISTS idx_visits_last_modified ON visits(last_modified);

-- ============================================================================
-- Prescriptions
-- ============================================================================

CREATE TABLE IF NOT EXISTS prescriptions (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    visit_id TEXT,                               -- soft reference to visits(id)
    drug_name TEXT,
    dosage TEXT,
    frequency TEXT,
    duration TEXT,
    instructions TEXT,
    sent_to_pharmacy INTEGER NOT NULL DEFAULT 0,
    last_modified TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_prescriptions_owner ON prescriptions(owner_id);
CREATE INDEX IF NOT EXISTS idx_prescriptions_visit ON prescriptions(visit_id);
CREATE INDEX IF NOT EXISTS idx_prescriptions_last_modified ON prescriptions(last_modified);

-- ============================================================================
-- Lab Orders
-- ============================================================================

CREATE TABLE IF NOT EXISTS lab_orders (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    visit_id TEXT,                               -- soft reference to visits(id)
    test_name TEXT,
    instructions TEXT,
    result_notes TEXT,
    sent_to_lab INTEGER NOT NULL DEFAULT 0,
    last_modified TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_lab_orders_owner ON lab_orders(owner_id);
CREATE INDEX IF NOT EXISTS idx_lab_orders_visit ON lab_orders(visit_id);
CREATE INDEX IF NOT EXISTS idx_lab_orders_last_modified ON lab_orders(last_modified);

-- ============================================================================
-- Drugs (per-doctor formulary)
-- ============================================================================

CREATE TABLE IF NOT EXISTS drugs (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT,
    generic_name TEXT,
    form TEXT,
    strength TEXT,
    is_favorite INTEGER NOT NULL DEFAULT 0,
    last_modified TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_drugs_owner ON drugs(owner_id);
CREATE INDEX IF NOT EXISTS idx_drugs_last_modified ON drugs(last_modified);

-- ============================================================================
-- Lab Test Types
-- ============================================================================

CREATE TABLE IF NOT EXISTS lab_test_types (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    name TEXT,
    category TEXT,
    description TEXT,
    last_modified TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    synced_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_lab_test_types_owner ON lab_test_types(owner_id);
CREATE INDEX IF NOT EXISTS idx_lab_test_types_last_modified ON lab_test_types(last_modified);

-- ============================================================================
-- Sync Tracking (one watermark per collection)
-- ============================================================================

CREATE TABLE IF NOT EXISTS sync_tracking (
    collection_name TEXT PRIMARY KEY,
    last_sync_timestamp TEXT NOT NULL
);
"#;
