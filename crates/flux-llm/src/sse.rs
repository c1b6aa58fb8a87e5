/// Minimal SSE line parser, lifted from the same split used for the
/// vendor streaming API: `event: <type>` / `data: <json>` lines
/// separated by blank lines.
#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}
