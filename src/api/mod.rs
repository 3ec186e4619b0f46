// =============================================================================
// Operator API Module
// =============================================================================
//
// Read-only status surface: component health, message rates, degradation
// flags, active alerts, and the current candidate pool.

pub mod rest;
