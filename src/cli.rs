//! CLI argument parsing for the tracker-worker binary.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tracker-worker", about = "Task and infra tracker backend worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the worker server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Create or update a user account interactively
    CreateUser {
        /// Account email address
        #[arg(long)]
        email: String,
        /// admin, employee or customer
        #[arg(long, default_value = "employee")]
        role: String,
        /// Customer the account belongs to (customer role only)
        #[arg(long)]
        customer: Option<String>,
        /// Display name (defaults to the email address)
        #[arg(long)]
        name: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["tracker-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["tracker-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_create_user_parses() {
        let cli = Cli::parse_from([
            "tracker-worker",
            "create-user",
            "--email",
            "ops@example.com",
            "--role",
            "customer",
            "--customer",
            "VIP",
        ]);
        match cli.command {
            Some(Command::CreateUser { email, role, customer, name }) => {
                assert_eq!(email, "ops@example.com");
                assert_eq!(role, "customer");
                assert_eq!(customer.as_deref(), Some("VIP"));
                assert!(name.is_none());
            }
            _ => panic!("expected create-user"),
        }
    }

    #[test]
    fn test_cli_create_user_role_defaults_to_employee() {
        let cli = Cli::parse_from(["tracker-worker", "create-user", "--email", "a@b.co"]);
        assert!(matches!(cli.command, Some(Command::CreateUser { ref role, .. }) if role == "employee"));
    }
}
