use std::io;

use refroute_mcp::ToolServer;

fn main() -> io::Result<()> {
    let server = match ToolServer::from_env() {
        Ok(server) => server,
        Err(err) => {
            eprintln!("Failed to start tool server: {err}");
            return Err(io::Error::new(io::ErrorKind::InvalidInput, err));
        }
    };
    eprintln!("refroute tool server listening on stdio");
    server.serve_stdio()
}
