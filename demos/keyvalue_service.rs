//! A worked example of what a generator targeting this crate would emit for
//! one IDL service: hand-written `Encode`/`Decode` impls for its declared
//! types, a message-id allocation in declaration order, a typed client, and
//! a typed server-side trait plus the registration code that wires it into
//! a [`DispatchTable`].
//!
//! This is demonstration code, not part of the crate's public API - it
//! exists to exercise the runtime end to end and to show the shape
//! generated code is expected to take.

use std::sync::Arc;

use rpc_runtime::dispatch::{ClientId, DispatchTable, MessageIdAllocator, PushHandler};
use rpc_runtime::{decode_enum, Client, Decode, Encode, Error, Reader, Server, WireEnum, Writer};

/// A record with one `i32` and one `i64` field (`spec.md` §8 scenario 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestStruct {
    pub i32_field: i32,
    pub i64_field: i64,
}

impl Encode for TestStruct {
    fn encode_into(&self, w: &mut Writer) {
        self.i32_field.encode_into(w);
        self.i64_field.encode_into(w);
    }
}

impl Decode for TestStruct {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            i32_field: i32::decode_from(r)?,
            i64_field: i64::decode_from(r)?,
        })
    }
}

/// The nested record carried by `testInOutParams`'s `data` field (`spec.md`
/// §8 scenario 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InOutData {
    pub i32_field: i32,
}

impl Encode for InOutData {
    fn encode_into(&self, w: &mut Writer) {
        self.i32_field.encode_into(w);
    }
}

impl Decode for InOutData {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            i32_field: i32::decode_from(r)?,
        })
    }
}

/// The kind of change a push notification describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyChangeType {
    KeyAdded,
    KeyRemoved,
    KeyModified,
}

impl WireEnum for KeyChangeType {
    const TYPE_NAME: &'static str = "KeyChangeType";
    const VARIANT_COUNT: u32 = 3;

    fn ordinal(&self) -> i32 {
        match self {
            KeyChangeType::KeyAdded => 0,
            KeyChangeType::KeyRemoved => 1,
            KeyChangeType::KeyModified => 2,
        }
    }

    fn from_ordinal(ordinal: i32) -> Option<Self> {
        match ordinal {
            0 => Some(KeyChangeType::KeyAdded),
            1 => Some(KeyChangeType::KeyRemoved),
            2 => Some(KeyChangeType::KeyModified),
            _ => None,
        }
    }
}

impl Decode for KeyChangeType {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, Error> {
        decode_enum(r)
    }
}

/// The payload of the `onKeyChanged` push channel (`spec.md` §8 scenario 5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChangeEvent {
    pub change_type: KeyChangeType,
    pub key: String,
    pub old_value: String,
    pub new_value: String,
    pub timestamp: i64,
}

impl Encode for KeyChangeEvent {
    fn encode_into(&self, w: &mut Writer) {
        self.change_type.encode_into(w);
        self.key.encode_into(w);
        self.old_value.encode_into(w);
        self.new_value.encode_into(w);
        self.timestamp.encode_into(w);
    }
}

impl Decode for KeyChangeEvent {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            change_type: KeyChangeType::decode_from(r)?,
            key: String::decode_from(r)?,
            old_value: String::decode_from(r)?,
            new_value: String::decode_from(r)?,
            timestamp: i64::decode_from(r)?,
        })
    }
}

/// Message ids for the `KeyValueService`, allocated from base `1000` in
/// declaration order: `testInt`, `testFloats`, `testString`, `testStruct`,
/// `testInOutParams`, then the `onKeyChanged` push channel.
#[derive(Debug, Clone, Copy)]
pub struct MessageIds {
    pub test_int: (u32, u32),
    pub test_floats: (u32, u32),
    pub test_string: (u32, u32),
    pub test_struct: (u32, u32),
    pub test_in_out_params: (u32, u32),
    pub on_key_changed: u32,
}

impl MessageIds {
    pub fn new() -> Self {
        let mut alloc = MessageIdAllocator::new(1000);
        Self {
            test_int: alloc.next_method(),
            test_floats: alloc.next_method(),
            test_string: alloc.next_method(),
            test_struct: alloc.next_method(),
            test_in_out_params: alloc.next_method(),
            on_key_changed: alloc.next_push_channel(),
        }
    }
}

/// The abstract handler surface a concrete service implementation provides
/// (`spec.md` §6's "handler surface").
pub trait KeyValueService {
    #[allow(clippy::too_many_arguments)]
    fn test_int(&self, i8v: i8, u8v: u8, i16v: i16, u16v: u16, i32v: i32, u32v: u32, i64v: i64, u64v: u64) -> i32;
    fn test_floats(&self, f: f32, d: f64) -> f64;
    fn test_string(&self, s: String) -> String;
    fn test_struct(&self, s: TestStruct) -> TestStruct;
    fn test_in_out_params(
        &self,
        value: i32,
        str_: String,
        data: InOutData,
        seq: Vec<i32>,
    ) -> (i32, String, InOutData, Vec<i32>);
}

/// Register every method handler generated code would emit for
/// `KeyValueService` into `dispatch`.
pub fn register_server(
    dispatch: &mut DispatchTable,
    ids: &MessageIds,
    service: Arc<dyn KeyValueService + Send + Sync>,
) {
    {
        let service = Arc::clone(&service);
        dispatch.register(
            ids.test_int.0,
            Arc::new(move |body: &[u8], _client: ClientId| -> Result<Vec<u8>, Error> {
                let mut r = Reader::new(body);
                let i8v = i8::decode_from(&mut r)?;
                let u8v = u8::decode_from(&mut r)?;
                let i16v = i16::decode_from(&mut r)?;
                let u16v = u16::decode_from(&mut r)?;
                let i32v = i32::decode_from(&mut r)?;
                let u32v = u32::decode_from(&mut r)?;
                let i64v = i64::decode_from(&mut r)?;
                let u64v = u64::decode_from(&mut r)?;
                let result = service.test_int(i8v, u8v, i16v, u16v, i32v, u32v, i64v, u64v);
                let mut w = Writer::new();
                result.encode_into(&mut w);
                Ok(w.into_vec())
            }),
        );
    }

    {
        let service = Arc::clone(&service);
        dispatch.register(
            ids.test_floats.0,
            Arc::new(move |body: &[u8], _client: ClientId| -> Result<Vec<u8>, Error> {
                let mut r = Reader::new(body);
                let f = f32::decode_from(&mut r)?;
                let d = f64::decode_from(&mut r)?;
                let result = service.test_floats(f, d);
                let mut w = Writer::new();
                result.encode_into(&mut w);
                Ok(w.into_vec())
            }),
        );
    }

    {
        let service = Arc::clone(&service);
        dispatch.register(
            ids.test_string.0,
            Arc::new(move |body: &[u8], _client: ClientId| -> Result<Vec<u8>, Error> {
                let mut r = Reader::new(body);
                let s = String::decode_from(&mut r)?;
                let result = service.test_string(s);
                let mut w = Writer::new();
                result.encode_into(&mut w);
                Ok(w.into_vec())
            }),
        );
    }

    {
        let service = Arc::clone(&service);
        dispatch.register(
            ids.test_struct.0,
            Arc::new(move |body: &[u8], _client: ClientId| -> Result<Vec<u8>, Error> {
                let mut r = Reader::new(body);
                let s = TestStruct::decode_from(&mut r)?;
                let result = service.test_struct(s);
                let mut w = Writer::new();
                result.encode_into(&mut w);
                Ok(w.into_vec())
            }),
        );
    }

    {
        let service = Arc::clone(&service);
        dispatch.register(
            ids.test_in_out_params.0,
            Arc::new(move |body: &[u8], _client: ClientId| -> Result<Vec<u8>, Error> {
                let mut r = Reader::new(body);
                let value = i32::decode_from(&mut r)?;
                let str_ = String::decode_from(&mut r)?;
                let data = InOutData::decode_from(&mut r)?;
                let seq = Vec::<i32>::decode_from(&mut r)?;
                let (value, str_, data, seq) = service.test_in_out_params(value, str_, data, seq);
                let mut w = Writer::new();
                value.encode_into(&mut w);
                str_.encode_into(&mut w);
                data.encode_into(&mut w);
                seq.encode_into(&mut w);
                Ok(w.into_vec())
            }),
        );
    }
}

/// The response shape for `testInOutParams`: the single return value
/// followed by its in-out and out parameters, in declaration order
/// (`spec.md` §4.3).
#[derive(Debug, Clone, Default)]
pub struct InOutResponse {
    pub value: i32,
    pub str_: String,
    pub data: InOutData,
    pub seq: Vec<i32>,
}

impl Decode for InOutResponse {
    fn decode_from(r: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            value: i32::decode_from(r)?,
            str_: String::decode_from(r)?,
            data: InOutData::decode_from(r)?,
            seq: Vec::<i32>::decode_from(r)?,
        })
    }
}

/// A typed client for `KeyValueService`, wrapping the untyped
/// [`rpc_runtime::Client`] primitive the way generated code would.
pub struct KeyValueClient {
    inner: Client,
    ids: MessageIds,
}

impl KeyValueClient {
    pub fn new(inner: Client, ids: MessageIds) -> Self {
        Self { inner, ids }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn test_int(
        &self,
        i8v: i8,
        u8v: u8,
        i16v: i16,
        u16v: u16,
        i32v: i32,
        u32v: u32,
        i64v: i64,
        u64v: u64,
    ) -> i32 {
        let mut w = Writer::new();
        i8v.encode_into(&mut w);
        u8v.encode_into(&mut w);
        i16v.encode_into(&mut w);
        u16v.encode_into(&mut w);
        i32v.encode_into(&mut w);
        u32v.encode_into(&mut w);
        i64v.encode_into(&mut w);
        u64v.encode_into(&mut w);
        self.inner
            .call(self.ids.test_int.0, self.ids.test_int.1, &PreEncoded(w.into_vec()))
    }

    pub fn test_floats(&self, f: f32, d: f64) -> f64 {
        let mut w = Writer::new();
        f.encode_into(&mut w);
        d.encode_into(&mut w);
        self.inner.call(
            self.ids.test_floats.0,
            self.ids.test_floats.1,
            &PreEncoded(w.into_vec()),
        )
    }

    pub fn test_string(&self, s: &str) -> String {
        self.inner
            .call(self.ids.test_string.0, self.ids.test_string.1, &s.to_string())
    }

    pub fn test_struct(&self, s: TestStruct) -> TestStruct {
        self.inner
            .call(self.ids.test_struct.0, self.ids.test_struct.1, &s)
    }

    pub fn test_in_out_params(
        &self,
        value: i32,
        str_: &str,
        data: InOutData,
        seq: Vec<i32>,
    ) -> InOutResponse {
        let mut w = Writer::new();
        value.encode_into(&mut w);
        str_.to_string().encode_into(&mut w);
        data.encode_into(&mut w);
        seq.encode_into(&mut w);
        self.inner.call(
            self.ids.test_in_out_params.0,
            self.ids.test_in_out_params.1,
            &PreEncoded(w.into_vec()),
        )
    }

    pub fn on_key_changed(&self, handler: PushHandler) {
        self.inner.on_push(self.ids.on_key_changed, handler);
    }

    pub fn stop_listening(&self) {
        self.inner.stop_listening();
    }
}

/// A request whose wire bytes have already been assembled - used by
/// multi-argument methods above so `Client::call` only ever needs a single
/// `Encode` value, the way a generator's per-method request struct would.
struct PreEncoded(Vec<u8>);

impl Encode for PreEncoded {
    fn encode_into(&self, w: &mut Writer) {
        w.write_bytes(&self.0);
    }
}

/// Wire up the server side: bind, register handlers for `service`, and hand
/// back the bound [`Server`] plus its push-notification primitive for
/// `onKeyChanged`.
pub fn serve_tcp(
    addr: impl std::net::ToSocketAddrs,
    ids: &MessageIds,
    service: Arc<dyn KeyValueService + Send + Sync>,
) -> Result<Server, Error> {
    let mut dispatch = DispatchTable::new();
    register_server(&mut dispatch, ids, service);
    Server::bind_tcp(addr, dispatch)
}

/// Broadcast a key-change event to every connected client, excluding
/// `exclude` if given.
pub fn push_on_key_changed(
    server: &Server,
    ids: &MessageIds,
    event: &KeyChangeEvent,
    exclude: Option<ClientId>,
) -> Result<(), Error> {
    let mut w = Writer::new();
    event.encode_into(&mut w);
    server.broadcast(ids.on_key_changed, w.as_slice(), exclude)
}
