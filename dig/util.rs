use encoding8::ascii;
use std::io::{self, Write};

const WIDTH: usize = 16;

/// Writes a packet as rows of offset, hex bytes and printable ASCII, with
/// a gap after the eighth byte of each row.
pub fn hexdump<W: Write>(mut w: W, packet: &[u8]) -> io::Result<()> {
    for (i, row) in packet.chunks(WIDTH).enumerate() {
        let mut hex = String::with_capacity(3 * WIDTH + 1);
        for (j, b) in row.iter().enumerate() {
            if j == WIDTH / 2 {
                hex.push(' ');
            }
            hex.push_str(&format!("{:02x} ", b));
        }

        let text: String = row
            .iter()
            .map(|&b| if ascii::is_printable(b) { b as char } else { '.' })
            .collect();

        writeln!(w, "{:04x}  {:<49} |{}|", i * WIDTH, hex, text)?;
    }

    Ok(())
}
