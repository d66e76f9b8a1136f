use std::fmt;

/// Server verbs. Unknown wire values are kept as [`Command::Other`] so a
/// newer server cannot stall the receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Close,
    Abort,
    Cmd,
    CmdWithReturn,
    Run,
    Return,
    Register,
    Unregister,
    Event,
    Func,
    FuncWithReturn,
    ChanRead,
    ChanSend,
    Reply,
    Hello,
    HelloReply,
    Other(i32),
}

impl Command {
    pub fn code(self) -> i32 {
        match self {
            Command::Close => 1,
            Command::Abort => 2,
            Command::Cmd => 3,
            Command::CmdWithReturn => 4,
            Command::Run => 5,
            Command::Return => 6,
            Command::Register => 7,
            Command::Unregister => 8,
            Command::Event => 9,
            Command::Func => 10,
            Command::FuncWithReturn => 11,
            Command::ChanRead => 12,
            Command::ChanSend => 13,
            Command::Reply => 14,
            Command::Hello => 15,
            Command::HelloReply => 16,
            Command::Other(code) => code,
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Other(0)
    }
}

impl From<i32> for Command {
    fn from(code: i32) -> Self {
        match code {
            1 => Command::Close,
            2 => Command::Abort,
            3 => Command::Cmd,
            4 => Command::CmdWithReturn,
            5 => Command::Run,
            6 => Command::Return,
            7 => Command::Register,
            8 => Command::Unregister,
            9 => Command::Event,
            10 => Command::Func,
            11 => Command::FuncWithReturn,
            12 => Command::ChanRead,
            13 => Command::ChanSend,
            14 => Command::Reply,
            15 => Command::Hello,
            16 => Command::HelloReply,
            other => Command::Other(other),
        }
    }
}

/// Body encoding. The array family (5..=15) carries `rows` x `cols`
/// elements and gets a different downstream representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// No typed body (register/unregister/abort)
    #[default]
    None,
    Double,
    String,
    Error,
    Assoc,
    ArrDouble,
    ArrFloat,
    ArrLong,
    ArrULong,
    ArrShort,
    ArrUShort,
    ArrChar,
    ArrUChar,
    ArrString,
    ArrLong64,
    ArrULong64,
    Other(i32),
}

impl DataType {
    pub fn code(self) -> i32 {
        match self {
            DataType::None => 0,
            DataType::Double => 1,
            DataType::String => 2,
            DataType::Error => 3,
            DataType::Assoc => 4,
            DataType::ArrDouble => 5,
            DataType::ArrFloat => 6,
            DataType::ArrLong => 7,
            DataType::ArrULong => 8,
            DataType::ArrShort => 9,
            DataType::ArrUShort => 10,
            DataType::ArrChar => 11,
            DataType::ArrUChar => 12,
            DataType::ArrString => 13,
            DataType::ArrLong64 => 14,
            DataType::ArrULong64 => 15,
            DataType::Other(code) => code,
        }
    }

    pub fn is_array(self) -> bool {
        (5..=15).contains(&self.code())
    }

    /// Text-like bodies travel NUL-terminated on the wire.
    pub(crate) fn is_text(self) -> bool {
        matches!(self, DataType::String | DataType::Error | DataType::Assoc)
    }
}

impl From<i32> for DataType {
    fn from(code: i32) -> Self {
        match code {
            0 => DataType::None,
            1 => DataType::Double,
            2 => DataType::String,
            3 => DataType::Error,
            4 => DataType::Assoc,
            5 => DataType::ArrDouble,
            6 => DataType::ArrFloat,
            7 => DataType::ArrLong,
            8 => DataType::ArrULong,
            9 => DataType::ArrShort,
            10 => DataType::ArrUShort,
            11 => DataType::ArrChar,
            12 => DataType::ArrUChar,
            13 => DataType::ArrString,
            14 => DataType::ArrLong64,
            15 => DataType::ArrULong64,
            other => DataType::Other(other),
        }
    }
}

/// One frame, either direction. Read-only once received.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub command: Command,
    /// 0 means "not a tracked request"
    pub sequence_number: u32,
    pub property_name: String,
    pub data_type: DataType,
    pub body: Vec<u8>,
    pub is_error: bool,
    pub rows: u32,
    pub cols: u32,
    /// Bitset of protocol flags
    pub flags: u32,
}

impl Message {
    /// Server push about `property_name`.
    pub fn is_event(&self) -> bool {
        self.command == Command::Event
    }

    pub fn is_event_for(
        &self,
        property: &str,
    ) -> bool {
        self.is_event() && self.property_name == property
    }

    /// Either the err header field or an ERROR-typed body.
    pub fn reports_error(&self) -> bool {
        self.is_error || self.data_type == DataType::Error
    }

    /// Body as text, trailing NULs and whitespace trimmed.
    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body)
            .trim_end_matches('\0')
            .trim()
            .to_string()
    }

    pub fn body_f64(&self) -> Option<f64> {
        match self.data_type {
            DataType::Double if self.body.len() == 8 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.body);
                Some(f64::from_le_bytes(raw))
            }
            _ => self.body_str().parse().ok(),
        }
    }

    pub fn has_flag(
        &self,
        bit: u8,
    ) -> bool {
        bit < 32 && self.flags & (1 << bit) != 0
    }

    /// Builds a server push. Used by test servers and by the watch cache
    /// when it records a local write.
    pub fn event(
        property: impl Into<String>,
        data_type: DataType,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            command: Command::Event,
            property_name: property.into(),
            data_type,
            body: body.into(),
            ..Default::default()
        }
    }

    /// Builds a reply to request `sn`.
    pub fn reply(
        sn: u32,
        data_type: DataType,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            command: Command::Reply,
            sequence_number: sn,
            data_type,
            is_error: data_type == DataType::Error,
            body: body.into(),
            ..Default::default()
        }
    }
}

impl fmt::Display for Message {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{:?}#{} {:?} [{:?}] {}",
            self.command,
            self.sequence_number,
            self.property_name,
            self.data_type,
            self.body_str()
        )
    }
}

/// An outbound request before the correlator stamps a sequence number.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    pub command: Command,
    pub property_name: String,
    pub data_type: DataType,
    pub body: Vec<u8>,
    pub is_error: bool,
    pub rows: u32,
    pub cols: u32,
    pub flags: u32,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            ..Default::default()
        }
    }

    pub fn register(property: &str) -> Self {
        Self::new(Command::Register).property(property)
    }

    pub fn unregister(property: &str) -> Self {
        Self::new(Command::Unregister).property(property)
    }

    pub fn chan_read(property: &str) -> Self {
        Self::new(Command::ChanRead)
            .property(property)
            .data_type(DataType::String)
    }

    pub fn chan_send(
        property: &str,
        value: &str,
    ) -> Self {
        Self::new(Command::ChanSend)
            .property(property)
            .data_type(DataType::String)
            .body(value.as_bytes().to_vec())
    }

    /// Console commands travel in the name field, newline terminated.
    pub fn console(
        command_text: &str,
        with_return: bool,
    ) -> Self {
        let mut text = command_text.to_string();
        if !text.ends_with('\n') {
            text.push('\n');
        }
        let command = if with_return {
            Command::FuncWithReturn
        } else {
            Command::Func
        };
        Self::new(command).property(&text)
    }

    pub fn property(
        mut self,
        name: &str,
    ) -> Self {
        self.property_name = name.to_string();
        self
    }

    pub fn data_type(
        mut self,
        data_type: DataType,
    ) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn body(
        mut self,
        body: Vec<u8>,
    ) -> Self {
        self.body = body;
        self
    }

    pub fn shape(
        mut self,
        rows: u32,
        cols: u32,
    ) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }

    pub fn flags(
        mut self,
        flags: u32,
    ) -> Self {
        self.flags = flags;
        self
    }

    pub(crate) fn into_message(
        self,
        sequence_number: u32,
    ) -> Message {
        Message {
            command: self.command,
            sequence_number,
            property_name: self.property_name,
            data_type: self.data_type,
            body: self.body,
            is_error: self.is_error,
            rows: self.rows,
            cols: self.cols,
            flags: self.flags,
        }
    }
}
