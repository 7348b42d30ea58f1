use criterion::{black_box, criterion_group, criterion_main, Criterion};
use kettle::handler::{HandlerEvent, HandlerFilter, HandlerResult, UserData};
use kettle::headers::Headers;
use kettle::session::{MessageKey, Session};
use kettle::transfer::NullTransfer;
use kettle::uri::Uri;

fn continue_handler(
    _session: &mut Session,
    _msg_key: MessageKey,
    _user_data: Option<&UserData>,
) -> HandlerResult {
    HandlerResult::CONTINUE
}

fn header_map(c: &mut Criterion) {
    c.bench_function("headers_add_get", |b| {
        b.iter(|| {
            let mut headers = Headers::new();
            for at in 0..16 {
                headers.add(if at % 2 == 0 { "Accept" } else { "Set-Cookie" }, "value");
            }
            black_box(headers.get_one("accept"));
            black_box(headers.get_all("set-cookie"));
        })
    });
}

fn dispatch(c: &mut Criterion) {
    c.bench_function("run_handlers", |b| {
        let mut session = Session::new(Box::new(NullTransfer::new()));
        let uri = Uri::parse("http://bench.example.com/").expect("bench url");
        let ctx = session.context_from_uri(uri).expect("bench context");
        let msg = session.new_message(ctx, None);
        for _ in 0..8 {
            session.add_handler(
                msg,
                HandlerEvent::HEADERS,
                HandlerFilter::ANY,
                continue_handler,
                None,
            );
        }
        b.iter(|| black_box(session.run_handlers(msg, HandlerEvent::HEADERS)))
    });
}

criterion_group!(benches, header_map, dispatch);
criterion_main!(benches);
