use std::{fmt, io};

use nu_ansi_term::{Color, Style};
use tracing::{field, span, Event, Level, Subscriber};
use tracing_subscriber::field::{RecordFields, VisitFmt, VisitOutput};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

/// Compact, human-oriented log line.
///
/// `[LEVEL] [MM-DD|hh:mm:ss.mmm] span{fields}: message key=value ...`
pub struct PipelineFormat {
    time_format: time::format_description::OwnedFormatItem,
}

impl<S, N> FormatEvent<S, N> for PipelineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();

        write!(
            writer,
            "{}",
            FmtLevel::new(meta.level(), writer.has_ansi_escapes())
        )?;
        writer.write_char(' ')?;
        if self.format_time(&mut writer).is_err() {
            write!(writer, "[<unknown-timestamp>]")?;
        };
        writer.write_char(' ')?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let name = if writer.has_ansi_escapes() {
                    Style::new().bold().paint(span.name()).to_string()
                } else {
                    span.name().to_string()
                };
                write!(writer, "{name}")?;

                let extensions = span.extensions();
                if let Some(fields) = extensions.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                writer.write_str(": ")?;
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

impl<'w> FormatFields<'w> for PipelineFormat {
    fn format_fields<R: RecordFields>(&self, writer: Writer<'w>, fields: R) -> fmt::Result {
        let mut v = FieldVisitor::new(writer, true);
        fields.record(&mut v);
        v.finish()
    }

    fn add_fields(
        &self,
        current: &'w mut FormattedFields<Self>,
        fields: &span::Record<'_>,
    ) -> fmt::Result {
        let empty = current.is_empty();
        let writer = current.as_writer();
        let mut v = FieldVisitor::new(writer, empty);
        fields.record(&mut v);
        v.finish()
    }
}

struct FieldVisitor<'a> {
    writer: Writer<'a>,
    is_empty: bool,
    result: fmt::Result,
}

impl<'a> FieldVisitor<'a> {
    fn new(writer: Writer<'a>, is_empty: bool) -> Self {
        Self {
            writer,
            is_empty,
            result: Ok(()),
        }
    }

    fn write_padded(&mut self, v: &impl fmt::Display) {
        let padding = if self.is_empty {
            self.is_empty = false;
            ""
        } else {
            " "
        };

        self.result = write!(self.writer, "{}{}", padding, v);
    }
}

impl field::Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        if self.result.is_err() {
            return;
        }

        if field.name() == "message" {
            self.write_padded(&format_args!("{:<40}", value));
        } else {
            self.record_debug(field, &value)
        }
    }

    fn record_debug(&mut self, field: &field::Field, value: &dyn fmt::Debug) {
        if self.result.is_err() {
            return;
        }

        let value = format!("{:?}", value);
        match field.name() {
            "message" => self.write_padded(&format_args!("{:<40}", value)),
            name => {
                if self.writer.has_ansi_escapes() {
                    let color = if name == "error" || name == "err" {
                        Color::Red
                    } else {
                        Color::Blue
                    };
                    self.write_padded(&format_args!("{}={}", name, color.paint(value)));
                } else {
                    self.write_padded(&format_args!("{}={}", name, value));
                }
            }
        }
    }
}

impl VisitOutput<fmt::Result> for FieldVisitor<'_> {
    fn finish(self) -> fmt::Result {
        self.result
    }
}

impl VisitFmt for FieldVisitor<'_> {
    fn writer(&mut self) -> &mut dyn fmt::Write {
        &mut self.writer
    }
}

impl PipelineFormat {
    pub fn format_time(&self, writer: &mut Writer<'_>) -> fmt::Result {
        let now = time::OffsetDateTime::now_utc();
        let mut w = WriteAdaptor { fmt_writer: writer };
        now.format_into(&mut w, &self.time_format)
            .map_err(|_| fmt::Error)?;
        Ok(())
    }
}

impl Default for PipelineFormat {
    fn default() -> Self {
        // The description is a literal; parsing it can only fail on a typo.
        let time_format = time::format_description::parse_owned::<2>(
            r#"\[[month]-[day]|[hour]:[minute]:[second].[subsecond digits:3]\]"#,
        )
        .expect("failed to parse time format");

        Self { time_format }
    }
}

struct FmtLevel<'a> {
    level: &'a Level,
    ansi: bool,
}

impl<'a> FmtLevel<'a> {
    fn new(level: &'a Level, ansi: bool) -> Self {
        Self { level, ansi }
    }
}

impl fmt::Display for FmtLevel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, color) = match *self.level {
            Level::TRACE => ("TRACE", Color::Purple),
            Level::DEBUG => ("DEBUG", Color::Blue),
            Level::INFO => ("INFO", Color::Green),
            Level::WARN => ("WARN", Color::Yellow),
            Level::ERROR => ("ERROR", Color::Red),
        };

        if self.ansi {
            write!(f, "[{}]", color.paint(name))
        } else {
            write!(f, "[{name}]")
        }
    }
}

struct WriteAdaptor<'a> {
    fmt_writer: &'a mut dyn fmt::Write,
}

impl io::Write for WriteAdaptor<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = std::str::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        self.fmt_writer
            .write_str(s)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        Ok(s.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
