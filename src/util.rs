use std::net::{IpAddr, Ipv4Addr};
use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Prints `prompt` and reads one line, trimmed.
pub async fn prompt_line<R, W>(prompt: &str, input: &mut R, output: &mut W) -> Result<String>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(prompt.as_bytes()).await?;
    output.flush().await?;

    let mut line = String::new();
    if input.read_line(&mut line).await? == 0 {
        return Err(anyhow::anyhow!("no host address given on stdin"));
    }
    Ok(line.trim().to_string())
}

/// ICMP here is IPv4 only, so names must resolve to an A record.
pub async fn resolve_host_to_ipv4(host: &str) -> Result<Ipv4Addr> {
    if host.is_empty() {
        return Err(anyhow::anyhow!("host address is empty"));
    }

    // First try to parse as IP address
    if let Ok(ip) = host.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(v4) => Ok(v4),
            IpAddr::V6(_) => Err(anyhow::anyhow!("{} is an IPv6 address, only IPv4 is supported", host)),
        };
    }

    // If parsing fails, resolve via DNS
    let addr = format!("{}:0", host);
    let addrs = tokio::net::lookup_host(&addr).await?;
    addrs
        .filter_map(|a| match a.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| anyhow::anyhow!("Could not resolve hostname to an IPv4 address: {}", host))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn prompt_reads_trimmed_line() {
        let mut input = BufReader::new(&b"  10.1.2.3 \nignored\n"[..]);
        let mut output = Vec::new();
        let host = prompt_line("Enter host ip address:", &mut input, &mut output).await.unwrap();
        assert_eq!(host, "10.1.2.3");
        assert_eq!(output, b"Enter host ip address:");
    }

    #[tokio::test]
    async fn prompt_fails_on_closed_input() {
        let mut input = BufReader::new(&b""[..]);
        let mut output = Vec::new();
        assert!(prompt_line("> ", &mut input, &mut output).await.is_err());
    }

    #[tokio::test]
    async fn literal_addresses() {
        assert_eq!(resolve_host_to_ipv4("192.0.2.7").await.unwrap(), Ipv4Addr::new(192, 0, 2, 7));
        assert!(resolve_host_to_ipv4("::1").await.is_err());
        assert!(resolve_host_to_ipv4("").await.is_err());
    }
}
