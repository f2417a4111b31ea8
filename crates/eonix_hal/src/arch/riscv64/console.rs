//! Byte-at-a-time SBI legacy console output, used by early bootstrap code
//! before percpu areas or the real log sink registry exist.
pub fn write_str(s: &str) {
    for &byte in s.as_bytes() {
        if byte == b'\n' {
            sbi::legacy::console_putchar(b'\r');
        }
        sbi::legacy::console_putchar(byte);
    }
}
