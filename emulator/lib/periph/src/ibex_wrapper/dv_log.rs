/*++

Licensed under the Apache-2.0 license.

File Name:

    dv_log.rs

Abstract:

    File contains the DV log engine: log records fetched from guest memory
    and the printf-style formatter applied to them.

--*/

use ot_emu_bus::{AddressSpace, CharBackend};
use ot_emu_types::MemTxAttrs;

/// Longest string fetched for a `%s` argument or a file name
pub const STR_MAX: usize = 256;
const FMT_MAX: usize = 1024;
const ARGS_MAX: u32 = 32;

/// A collected argument: a raw word, or the string a `%s` pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DvArg {
    Word(u32),
    Str(String),
}

#[derive(Debug, Default)]
struct FormatSpec {
    left: bool,
    zero: bool,
    width: usize,
    conv: char,
}

impl FormatSpec {
    /// Parses the part following a `%`. Returns `None` when the string
    /// ends before the conversion character.
    fn parse(chars: &mut std::iter::Peekable<std::str::Chars>) -> Option<Self> {
        let mut spec = FormatSpec::default();
        while let Some(&c) = chars.peek() {
            match c {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                _ => break,
            }
            chars.next();
        }
        while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
            spec.width = spec.width * 10 + digit as usize;
            chars.next();
        }
        while matches!(chars.peek(), Some('l') | Some('h')) {
            chars.next();
        }
        spec.conv = chars.next()?;
        Some(spec)
    }

    fn takes_arg(&self) -> bool {
        matches!(self.conv, 'd' | 'i' | 'u' | 'x' | 'X' | 'o' | 'c' | 's' | 'p')
    }

    fn render(&self, arg: Option<&DvArg>) -> String {
        let word = match arg {
            Some(DvArg::Str(s)) => return s.clone(),
            Some(DvArg::Word(w)) => *w,
            None => return "<?>".into(),
        };
        match self.conv {
            'd' | 'i' => (word as i32).to_string(),
            'u' => word.to_string(),
            'x' => format!("{word:x}"),
            'X' => format!("{word:X}"),
            'o' => format!("{word:o}"),
            'c' => char::from(word as u8).to_string(),
            'p' => format!("0x{word:08x}"),
            _ => format!("{word:#x}"),
        }
    }

    fn pad(&self, text: &str, out: &mut String) {
        let fill = self.width.saturating_sub(text.chars().count());
        if self.left {
            out.push_str(text);
            out.extend(std::iter::repeat(' ').take(fill));
        } else if self.zero && !matches!(self.conv, 's' | 'c') {
            let (sign, digits) = match text.strip_prefix('-') {
                Some(rest) => ("-", rest),
                None => ("", text),
            };
            out.push_str(sign);
            out.extend(std::iter::repeat('0').take(fill));
            out.push_str(digits);
        } else {
            out.extend(std::iter::repeat(' ').take(fill));
            out.push_str(text);
        }
    }
}

/// Conversion characters of `fmt` that consume an argument, in order.
pub fn arg_kinds(fmt: &str) -> Vec<char> {
    let mut kinds = vec![];
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        match FormatSpec::parse(&mut chars) {
            Some(spec) if spec.takes_arg() => kinds.push(spec.conv),
            Some(_) => {}
            None => break,
        }
    }
    kinds
}

/// Formats `fmt` with `args`. Unknown conversions are copied verbatim.
pub fn format(fmt: &str, args: &[DvArg]) -> String {
    let mut out = String::new();
    let mut args = args.iter();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let Some(spec) = FormatSpec::parse(&mut chars) else {
            out.push('%');
            break;
        };
        if spec.conv == '%' {
            out.push('%');
        } else if spec.takes_arg() {
            let text = spec.render(args.next());
            spec.pad(&text, &mut out);
        } else {
            out.push('%');
            out.push(spec.conv);
        }
    }
    out
}

/// Reads a NUL-terminated string of at most `max` bytes from guest
/// memory. Returns `None` when not even the first byte is readable.
pub fn read_cstr(space: &AddressSpace, addr: u32, max: usize) -> Option<String> {
    let mut bytes = vec![];
    for i in 0..max as u64 {
        let mut byte = [0u8];
        if space
            .read(u64::from(addr) + i, &mut byte, MemTxAttrs::default())
            .is_err()
        {
            if i == 0 {
                return None;
            }
            break;
        }
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
    }
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl From<u32> for Severity {
    fn from(val: u32) -> Self {
        match val {
            0 => Severity::Info,
            1 => Severity::Warning,
            2 => Severity::Error,
            _ => Severity::Fatal,
        }
    }
}

impl Severity {
    fn level(self) -> log::Level {
        match self {
            Severity::Info => log::Level::Info,
            Severity::Warning => log::Level::Warn,
            Severity::Error | Severity::Fatal => log::Level::Error,
        }
    }
}

struct Record {
    severity: Severity,
    file: String,
    line: u32,
    fmt: String,
    kinds: Vec<char>,
    nargs: usize,
}

enum LogState {
    Idle,
    /// Collecting the arguments of a record
    Arg { record: Record, args: Vec<DvArg> },
    /// Discarding the arguments of a record that could not be decoded
    Error { remaining: u32 },
}

/// Engine fed by the writes to DV_SIM_LOG.
pub struct DvLog {
    state: LogState,
    space: AddressSpace,
    output: Option<Box<dyn CharBackend>>,
}

impl DvLog {
    pub fn new(space: AddressSpace) -> Self {
        Self {
            state: LogState::Idle,
            space,
            output: None,
        }
    }

    /// Mirrors every emitted line to `output`.
    pub fn set_output(&mut self, output: Box<dyn CharBackend>) {
        self.output = Some(output);
    }

    pub fn reset(&mut self) {
        self.state = LogState::Idle;
    }

    pub fn write(&mut self, val: u32) {
        self.state = match std::mem::replace(&mut self.state, LogState::Idle) {
            LogState::Idle => self.fetch_record(val),
            LogState::Arg { record, mut args } => {
                let arg = match record.kinds.get(args.len()).copied() {
                    Some('s') => match read_cstr(&self.space, val, STR_MAX) {
                        Some(s) => DvArg::Str(s),
                        None => DvArg::Str(format!("<{val:#x}?>")),
                    },
                    _ => DvArg::Word(val),
                };
                args.push(arg);
                self.collect(record, args)
            }
            LogState::Error { remaining } if remaining > 1 => LogState::Error {
                remaining: remaining - 1,
            },
            LogState::Error { .. } => LogState::Idle,
        };
    }

    fn fetch_record(&mut self, addr: u32) -> LogState {
        let mut words = [0u32; 5];
        for (i, word) in words.iter_mut().enumerate() {
            let at = u64::from(addr) + 4 * i as u64;
            match self.space.read_u32(at, MemTxAttrs::default()) {
                Ok(val) => *word = val,
                Err(err) => {
                    log::error!("dv_log: cannot read record at {addr:#x}: {err:?}");
                    return LogState::Idle;
                }
            }
        }
        let [severity, file_ptr, line, nargs, fmt_ptr] = words;
        let Some(fmt) = read_cstr(&self.space, fmt_ptr, FMT_MAX) else {
            log::error!("dv_log: cannot read format string at {fmt_ptr:#x}");
            return match nargs {
                0 => LogState::Idle,
                n => LogState::Error { remaining: n },
            };
        };
        if nargs > ARGS_MAX {
            log::error!("dv_log: too many arguments ({nargs})");
            return LogState::Error { remaining: nargs };
        }
        let record = Record {
            severity: Severity::from(severity),
            file: read_cstr(&self.space, file_ptr, STR_MAX).unwrap_or_else(|| "?".into()),
            line,
            kinds: arg_kinds(&fmt),
            fmt,
            nargs: nargs as usize,
        };
        self.collect(record, vec![])
    }

    fn collect(&mut self, record: Record, args: Vec<DvArg>) -> LogState {
        if args.len() < record.nargs {
            return LogState::Arg { record, args };
        }
        let text = format(&record.fmt, &args);
        let line = format!("{}:{}: {}", record.file, record.line, text.trim_end_matches('\n'));
        log::log!(record.severity.level(), "dv: {line}");
        if let Some(out) = self.output.as_mut() {
            out.write_all(line.as_bytes());
            out.write_all(b"\n");
        }
        LogState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_conversions() {
        let args = [
            DvArg::Word(0xffff_fffe),
            DvArg::Word(42),
            DvArg::Word(0xab),
            DvArg::Word(0xab),
            DvArg::Word(0x41),
            DvArg::Str("hi".into()),
            DvArg::Word(0x1000),
            DvArg::Word(8),
        ];
        assert_eq!(
            format("%d %5u|%-4x|%04X %c %s %p %lo %%", &args),
            "-2    42|ab  |00AB A hi 0x00001000 10 %"
        );
        assert_eq!(format("%05d", &[DvArg::Word(-42i32 as u32)]), "-0042");
        assert_eq!(format("%q %d", &[]), "%q <?>");
    }

    #[test]
    fn test_arg_kinds() {
        assert_eq!(arg_kinds("a %% %08lx %s %hd %"), vec!['x', 's', 'd']);
    }
}
