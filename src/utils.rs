/// Formats `buffer` as a hexdump whose first byte lives at address `start`.
pub fn hexdump(buffer: &[u8], start: u32) -> String {
    let mut str = String::new();
    for (n, chunk) in buffer.chunks(16).enumerate() {
        let mut line = format!("{:05x}: ", start as usize + n * 16);
        let mut chars = String::new();
        for &byte in chunk {
            line.push_str(&format!("{:02x} ", byte));
            let c = byte as char;
            chars.push(if c.is_ascii_graphic() || c == ' ' {
                c
            } else {
                '.'
            });
        }

        let dump_line = format!("{:<55} {}\n", line, chars);
        str.push_str(&dump_line);
    }

    str
}
