//! Output formatting utilities for the CLI
//!
//! Tables for local services and collaborator groups, the enrollment
//! summary, and colored status messages.

use tabled::{settings::Style, Table, Tabled};

use ph_core::{LocalService, Notification, NotificationKind, ServiceGroup, Snapshot};

/// Format the orchestrator status and enrollment identity
pub fn format_status(snapshot: &Snapshot) -> String {
    let mut output = format!("Orchestrator: {}\n", snapshot.orchestrator_status);

    match &snapshot.enrollment {
        Some(enrollment) => {
            output.push_str(&format!(
                "Enrolled as: {} <{}>\n",
                enrollment.name, enrollment.email
            ));
            if let Some(github) = &enrollment.github_user {
                output.push_str(&format!("GitHub: {}\n", github));
            }
        }
        None => output.push_str("Not enrolled\n"),
    }

    output
}

/// Format local services as an ASCII table
pub fn format_local_services(services: &[LocalService]) -> String {
    if services.is_empty() {
        return "No local services".to_string();
    }

    #[derive(Tabled)]
    struct ServiceRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "ENDPOINT")]
        endpoint: String,
        #[tabled(rename = "SCHEME")]
        scheme: String,
        #[tabled(rename = "SHARED WITH")]
        shared_with: String,
        #[tabled(rename = "AVAILABLE")]
        available: String,
    }

    let rows: Vec<ServiceRow> = services
        .iter()
        .map(|s| ServiceRow {
            name: s.name.clone(),
            endpoint: format!("{}:{}", s.address, s.port),
            scheme: s.scheme.clone().unwrap_or_else(|| "-".to_string()),
            shared_with: if s.shared_with.is_empty() {
                "-".to_string()
            } else {
                s.shared_with
                    .iter()
                    .map(|i| i.email.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            },
            available: yes_no(s.available),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format pending invites and incoming services of every group as one table
pub fn format_groups(groups: &[ServiceGroup]) -> String {
    if groups.iter().all(|g| g.invites.is_empty() && g.incoming_services.is_empty()) {
        return "No invitations or shared services".to_string();
    }

    #[derive(Tabled)]
    struct GroupRow {
        #[tabled(rename = "FROM")]
        from: String,
        #[tabled(rename = "SERVICE")]
        service: String,
        #[tabled(rename = "STATE")]
        state: String,
        #[tabled(rename = "ENDPOINT")]
        endpoint: String,
        #[tabled(rename = "AVAILABLE")]
        available: String,
    }

    let mut rows = Vec::new();
    for group in groups {
        let from = match &group.name {
            Some(name) => format!("{} <{}>", name, group.email),
            None => group.email.clone(),
        };
        for invite in &group.invites {
            rows.push(GroupRow {
                from: from.clone(),
                service: invite.service_name.clone(),
                state: format!("invited ({})", invite.id),
                endpoint: "-".to_string(),
                available: "-".to_string(),
            });
        }
        for service in &group.incoming_services {
            rows.push(GroupRow {
                from: from.clone(),
                service: service.source_name.clone(),
                state: "accepted".to_string(),
                endpoint: format!("{}:{}", service.address, service.port),
                available: yes_no(service.available),
            });
        }
    }

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a whole snapshot
pub fn format_snapshot(snapshot: &Snapshot) -> String {
    format!(
        "{}\nLocal services:\n{}\n\nShared with you:\n{}",
        format_status(snapshot),
        format_local_services(&snapshot.local_services),
        format_groups(&snapshot.groups)
    )
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

/// Print a notification with the color of its kind
pub fn print_notification(notification: &Notification) {
    let msg = format!("{}: {}", notification.title, notification.message);
    match notification.kind {
        NotificationKind::Information => print_info(&msg),
        NotificationKind::Warning => print_warning(&msg),
        NotificationKind::Error => print_error(&msg),
    }
}

/// Print a success message in green with a checkmark prefix
///
/// Outputs to stdout with green coloring for positive feedback to the user.
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix
///
/// Outputs to stderr with red coloring for error feedback to the user.
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow with a warning symbol prefix
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan with an info symbol prefix
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}
