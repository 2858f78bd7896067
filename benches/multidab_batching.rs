use criterion::{black_box, criterion_group, criterion_main, Criterion};
use inkflow::canvas::layer_content::LayerContent;
use inkflow::msg::{ClassicDab, DrawDabsClassic, Payload};
use inkflow::paint::draw_dabs;
use inkflow::{BlendMode, CanvasHistory, Message};

fn stroke_payload(dab_count: usize) -> Payload {
  let dabs = (0..dab_count)
    .map(|i| ClassicDab {
      x: (i as i32) * 3,
      y: (i as i32) * 2,
      size: 8 * 256,
      hardness: 200,
      opacity: 180,
    })
    .collect();
  Payload::DrawDabsClassic(DrawDabsClassic {
    layer_id: 1,
    x: 64,
    y: 64,
    color: 0xff4080c0,
    mode: BlendMode::Normal,
    indirect: false,
    dabs,
  })
}

fn bench_draw_dabs(c: &mut Criterion) {
  c.bench_function("draw_dabs_classic_64", |b| {
    let payload = stroke_payload(64);
    b.iter(|| {
      let mut lc = LayerContent::new(512, 512);
      draw_dabs(1, black_box(&payload), 0, 0, &mut lc);
      lc
    });
  });
}

fn bench_flatten(c: &mut Criterion) {
  let ch = CanvasHistory::new(None, Box::new(|_, _| {}));
  ch.handle(&Message::new(
    1,
    Payload::CanvasResize { top: 0, right: 512, bottom: 512, left: 0 },
  ))
  .unwrap();
  ch.handle(&Message::new(1, Payload::LayerCreate { layer_id: 1, group: false }))
    .unwrap();
  ch.handle(&Message::new(1, stroke_payload(64))).unwrap();
  let cs = ch.current();

  c.bench_function("flatten_tile", |b| {
    b.iter(|| black_box(&cs).flatten_tile(0));
  });
}

criterion_group!(benches, bench_draw_dabs, bench_flatten);
criterion_main!(benches);
