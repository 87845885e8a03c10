use clap::{Parser, Subcommand};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "crowdcount")]
#[command(about = "Person detection task pipeline", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the submission API
    Serve(ServeArgs),
    /// Consume detection tasks from the queue
    Worker(WorkerArgs),
    /// Send URLs to a running server for validation and enqueueing
    Submit(SubmitArgs),
    /// List messages that failed processing, as held by a running server
    DeadLetters(DeadLettersArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to bind the HTTP server to (defaults to server.bind_addr)
    #[arg(long)]
    pub address: Option<SocketAddr>,

    /// Also run a worker in this process
    #[arg(long)]
    pub with_worker: bool,

    /// Consumers of the embedded worker (defaults to worker.consumers)
    #[arg(long, requires = "with_worker")]
    pub consumers: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub struct WorkerArgs {
    /// Unsettled deliveries held at once per consumer (defaults to broker.prefetch)
    #[arg(long)]
    pub prefetch: Option<usize>,

    /// Competing consumers in this process (defaults to worker.consumers)
    #[arg(long)]
    pub consumers: Option<usize>,
}

#[derive(clap::Args, Debug)]
pub struct SubmitArgs {
    /// URLs to submit; scheme defaults to http://
    #[arg(required = true)]
    pub urls: Vec<String>,

    /// Server base URL (defaults to the address in server.bind_addr)
    #[arg(long)]
    pub server: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct DeadLettersArgs {
    /// Maximum number of records to print
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Server base URL (defaults to the address in server.bind_addr)
    #[arg(long)]
    pub server: Option<String>,
}
