//! Point-in-time status reports

pub mod status_report;

pub use status_report::{
    generate, generate_admin_status_report, generate_status_report, report_context,
    ReportChannel, StatusReport, StatusReportEntry,
};
