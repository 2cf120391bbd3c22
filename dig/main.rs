// Simple dig style command line.
// dig [+udp|+tcp|+tls|+doh] [+insecure] [@server] {type} {domain}
mod util;

use http::Method;
use rdns::clients::*;
use rdns::types::*;
use std::env;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::str::FromStr;
use strum_macros::{Display, EnumString};

#[derive(Debug, Display, EnumString, PartialEq)]
enum Client {
    Udp,
    Tcp,
    Tls,
    DoH,
}

// A simple type alias so as to DRY.
type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Debug)]
struct Args {
    client: Client,
    server: Option<String>,
    insecure: bool,
    hex: bool,

    /// Query this type
    r#type: rdns::Type,

    /// For this domain
    domain: String,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Args> {
    let mut result = Args {
        client: Client::Udp,
        server: None,
        insecure: false,
        hex: false,

        r#type: Type::A,
        domain: String::new(),
    };

    let mut type_or_domain = Vec::<String>::new();

    for arg in args {
        match arg.as_str() {
            "+udp" => result.client = Client::Udp,
            "+tcp" => result.client = Client::Tcp,
            "+tls" => result.client = Client::Tls,
            "+doh" => result.client = Client::DoH,
            "+insecure" => result.insecure = true,
            "+hex" => result.hex = true,

            _ => {
                if arg.starts_with('+') {
                    return Err(format!("Unknown flag: {}", arg).into());
                }

                match arg.strip_prefix('@') {
                    Some(server) => result.server = Some(server.to_string()),
                    None => type_or_domain.push(arg),
                }
            }
        }
    }

    let mut found_type = false;
    let mut domains = Vec::new();

    // To be useful, we allow users to say `dig A bramp.net` or `dig bramp.net A`
    for arg in type_or_domain {
        if !found_type {
            // Use the first type we found and assume the rest are domains.
            if let Ok(r#type) = Type::from_str(&arg) {
                result.r#type = r#type;
                found_type = true;
                continue;
            }
        }

        domains.push(arg)
    }

    match domains.len() {
        0 => {
            // By default query the root domain
            result.domain = ".".to_string();
            if !found_type {
                result.r#type = Type::NS;
            }
        }
        1 => result.domain = domains.remove(0),
        _ => return Err(format!("Only one domain may be given, found {:?}", domains).into()),
    }

    Ok(result)
}

/// Parses `server` as "ip", or "ip:port".
fn socket_addr(server: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = server.parse() {
        return Ok(addr);
    }
    Ok(SocketAddr::new(server.parse()?, default_port))
}

/// Splits "host[:port]", resolving the host.
async fn resolve(server: &str, default_port: u16) -> Result<(String, SocketAddr)> {
    let (host, port) = match server.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => (host, port.parse()?),
        _ => (server, default_port),
    };

    match tokio::net::lookup_host((host, port)).await?.next() {
        Some(addr) => Ok((host.to_string(), addr)),
        None => Err(format!("{} did not resolve", host).into()),
    }
}

async fn client(args: &Args) -> Result<Box<dyn Exchanger>> {
    let server = args.server.as_deref();

    Ok(match args.client {
        Client::Udp => Box::new(UdpClient::connect(socket_addr(server.unwrap_or("8.8.8.8"), 53)?).await?),
        Client::Tcp => Box::new(TcpClient::connect(socket_addr(server.unwrap_or("8.8.8.8"), 53)?).await?),
        Client::Tls => {
            let (host, addr) = resolve(server.unwrap_or("dns.google"), 853).await?;
            Box::new(TlsClient::connect(addr, &host, args.insecure).await?)
        }
        Client::DoH => Box::new(DoHClient::new(server.unwrap_or(GOOGLE), Method::GET)?),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("Usage: dig [+udp|+tcp|+tls|+doh] [+insecure] [+hex] [@server] {{type}} {{domain}}");
            process::exit(1);
        }
    };

    let mut client = client(&args).await?;

    let mut query = Message::query(
        Question::new(&args.domain, args.r#type, Class::Internet),
        client.next_id(),
        true,
    );
    query.add_extension(Extension {
        payload_size: 4096,

        ..Default::default()
    });

    if args.hex {
        println!("query:");
        util::hexdump(io::stdout().lock(), &query.to_vec()?)?;
        println!();
    }
    println!("{}", query);

    let resp = client.query(&query).await?;
    client.close().await?;

    println!("response:");
    if args.hex {
        if let Some(packet) = resp.packet() {
            util::hexdump(io::stdout().lock(), packet)?;
            println!();
        }
    }
    println!("{}", resp);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(s: &str) -> Result<Args> {
        parse_args(s.split_whitespace().map(String::from))
    }

    #[test]
    fn test_parse_args() {
        let a = args("+tls @1.1.1.1 MX example.com").unwrap();
        assert_eq!(a.client, Client::Tls);
        assert_eq!(a.server.as_deref(), Some("1.1.1.1"));
        assert_eq!(a.r#type, Type::MX);
        assert_eq!(a.domain, "example.com");

        let a = args("example.com AAAA").unwrap();
        assert_eq!(a.client, Client::Udp);
        assert_eq!(a.r#type, Type::AAAA);

        let a = args("").unwrap();
        assert_eq!(a.domain, ".");
        assert_eq!(a.r#type, Type::NS);

        assert!(args("+bogus example.com").is_err());
        assert!(args("a.com b.com").is_err());
    }

    #[test]
    fn test_socket_addr() {
        assert_eq!(socket_addr("8.8.8.8", 53).unwrap(), "8.8.8.8:53".parse().unwrap());
        assert_eq!(socket_addr("8.8.8.8:5353", 53).unwrap(), "8.8.8.8:5353".parse().unwrap());
        assert!(socket_addr("dns.google", 53).is_err());
    }
}
