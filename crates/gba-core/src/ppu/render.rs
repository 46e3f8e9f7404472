use super::sprites::ObjLine;
use super::{Ppu, SCREEN_WIDTH};

/// Marks a layer pixel with nothing drawn. BG colours only use 15 bits.
pub(super) const TRANSPARENT: u16 = 0x8000;

const OBJ_LAYER: usize = 4;
const BACKDROP_LAYER: usize = 5;
const EFFECTS_BIT: u8 = 1 << 5;

const WHITE: u32 = 0x00FF_FFFF;

type Line = [u16; SCREEN_WIDTH];

/// BGR555 to 0x00RRGGBB, replicating the top bits into the low ones.
pub fn bgr555_to_rgb(color: u16) -> u32 {
    let expand = |c: u16| {
        let c = (c & 0x1F) as u32;
        (c << 3) | (c >> 2)
    };
    expand(color) << 16 | expand(color >> 5) << 8 | expand(color >> 10)
}

fn channels(c: u16) -> [u32; 3] {
    [(c & 0x1F) as u32, ((c >> 5) & 0x1F) as u32, ((c >> 10) & 0x1F) as u32]
}

fn pack([r, g, b]: [u32; 3]) -> u16 {
    (r.min(31) | g.min(31) << 5 | b.min(31) << 10) as u16
}

fn alpha_blend(top: u16, below: u16, eva: u32, evb: u32) -> u16 {
    let (a, b) = (channels(top), channels(below));
    pack([0, 1, 2].map(|i| (a[i] * eva + b[i] * evb) >> 4))
}

fn brighten(c: u16, evy: u32) -> u16 {
    pack(channels(c).map(|v| v + (((31 - v) * evy) >> 4)))
}

fn darken(c: u16, evy: u32) -> u16 {
    pack(channels(c).map(|v| v - ((v * evy) >> 4)))
}

/// Whether `pos` lies in the window span packed as start << 8 | end.
fn inside(span: u16, pos: usize) -> bool {
    let start = (span >> 8) as usize;
    let end = (span & 0xFF) as usize;
    if start <= end {
        pos >= start && pos < end
    } else {
        pos >= start || pos < end
    }
}

impl Ppu {
    #[inline]
    pub(super) fn palette16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.palette[offset], self.palette[offset + 1]]) & 0x7FFF
    }

    #[inline]
    pub(super) fn vram8(&self, addr: usize) -> u8 {
        self.vram.get(addr).copied().unwrap_or(0)
    }

    #[inline]
    fn vram16(&self, addr: usize) -> u16 {
        u16::from_le_bytes([self.vram8(addr), self.vram8(addr + 1)])
    }

    /// BG mosaic block size as (width, height).
    fn bg_mosaic(&self) -> (usize, usize) {
        (
            (self.mosaic & 0xF) as usize + 1,
            ((self.mosaic >> 4) & 0xF) as usize + 1,
        )
    }

    pub(super) fn obj_mosaic(&self) -> (usize, usize) {
        (
            ((self.mosaic >> 8) & 0xF) as usize + 1,
            ((self.mosaic >> 12) & 0xF) as usize + 1,
        )
    }

    fn layer_enabled(&self, layer: usize) -> bool {
        self.dispcnt & (0x100 << layer) != 0
    }

    pub(super) fn render_line(&mut self) {
        let line = self.vcount as usize;
        let mut row = [WHITE; SCREEN_WIDTH];

        if !self.forced_blank() {
            self.compose_line(line, &mut row);
        }
        let start = line * SCREEN_WIDTH;
        self.framebuffer[start..start + SCREEN_WIDTH].copy_from_slice(&row);
    }

    fn compose_line(&self, line: usize, row: &mut [u32; SCREEN_WIDTH]) {
        let mut layers = [[TRANSPARENT; SCREEN_WIDTH]; 4];
        let mut active = [false; 4];
        let mut draw = |bg: usize, f: &dyn Fn(&mut Line)| {
            if self.layer_enabled(bg) {
                f(&mut layers[bg]);
                active[bg] = true;
            }
        };
        match self.mode() {
            0 => {
                for bg in 0..4 {
                    draw(bg, &|out: &mut Line| self.text_line(bg, line, out));
                }
            }
            1 => {
                draw(0, &|out: &mut Line| self.text_line(0, line, out));
                draw(1, &|out: &mut Line| self.text_line(1, line, out));
                draw(2, &|out: &mut Line| self.affine_line(2, out));
            }
            2 => {
                draw(2, &|out: &mut Line| self.affine_line(2, out));
                draw(3, &|out: &mut Line| self.affine_line(3, out));
            }
            3..=5 => draw(2, &|out: &mut Line| self.bitmap_line(out)),
            _ => {}
        }

        let objs = if self.layer_enabled(OBJ_LAYER) {
            self.sprite_line(line)
        } else {
            ObjLine::default()
        };

        let priorities = self.bg.map(|b| (b.cnt & 3) as u8);
        let backdrop = self.palette16(0);
        let first_targets = (self.bldcnt & 0x3F) as u8;
        let second_targets = ((self.bldcnt >> 8) & 0x3F) as u8;
        let effect = (self.bldcnt >> 6) & 3;
        let eva = (self.bldalpha & 0x1F).min(16) as u32;
        let evb = ((self.bldalpha >> 8) & 0x1F).min(16) as u32;
        let evy = (self.bldy & 0x1F).min(16) as u32;

        for x in 0..SCREEN_WIDTH {
            let mask = self.window_mask(x, line, objs.window[x]);
            let obj = objs.pixels[x];
            let obj_visible = obj.color != TRANSPARENT && mask & (1 << OBJ_LAYER) != 0;

            // Top two layers, then the backdrop.
            let mut stack = [(BACKDROP_LAYER, backdrop); 2];
            let mut found = 0;
            'search: for prio in 0..4u8 {
                if obj_visible && obj.priority == prio {
                    stack[found] = (OBJ_LAYER, obj.color);
                    found += 1;
                    if found == 2 {
                        break 'search;
                    }
                }
                for bg in 0..4 {
                    let color = layers[bg][x];
                    if active[bg]
                        && priorities[bg] == prio
                        && color != TRANSPARENT
                        && mask & (1 << bg) != 0
                    {
                        stack[found] = (bg, color);
                        found += 1;
                        if found == 2 {
                            break 'search;
                        }
                    }
                }
            }

            let [(top_layer, top), (below_layer, below)] = stack;
            let blends_with_below = second_targets & (1 << below_layer) != 0;
            let effects = mask & EFFECTS_BIT != 0;
            let color = if top_layer == OBJ_LAYER && obj.semi && blends_with_below {
                alpha_blend(top, below, eva, evb)
            } else if effects && first_targets & (1 << top_layer) != 0 {
                match effect {
                    1 if blends_with_below => alpha_blend(top, below, eva, evb),
                    2 => brighten(top, evy),
                    3 => darken(top, evy),
                    _ => top,
                }
            } else {
                top
            };
            row[x] = bgr555_to_rgb(color);
        }
    }

    /// Layer and effect enables (bits 0-5) for one pixel.
    fn window_mask(&self, x: usize, line: usize, in_obj_window: bool) -> u8 {
        if self.dispcnt & 0xE000 == 0 {
            return 0x3F;
        }
        for w in 0..2 {
            if self.dispcnt & (0x2000 << w) != 0
                && inside(self.win_h[w], x)
                && inside(self.win_v[w], line)
            {
                return ((self.winin >> (8 * w)) & 0x3F) as u8;
            }
        }
        if self.dispcnt & 0x8000 != 0 && in_obj_window {
            return ((self.winout >> 8) & 0x3F) as u8;
        }
        (self.winout & 0x3F) as u8
    }

    fn text_line(&self, idx: usize, line: usize, out: &mut Line) {
        let regs = self.bg[idx];
        let cnt = regs.cnt;
        let char_base = ((cnt >> 2) & 3) as usize * 0x4000;
        let screen_base = ((cnt >> 8) & 0x1F) as usize * 0x800;
        let bpp8 = cnt & 0x80 != 0;
        let (width, height) = match cnt >> 14 {
            0 => (256, 256),
            1 => (512, 256),
            2 => (256, 512),
            _ => (512, 512),
        };
        let (mh, mv) = if cnt & 0x40 != 0 {
            self.bg_mosaic()
        } else {
            (1, 1)
        };

        let y = line - line % mv;
        let py = (y + regs.vofs as usize) & (height - 1);
        for (x, pixel) in out.iter_mut().enumerate() {
            let px = (x - x % mh + regs.hofs as usize) & (width - 1);
            let block = (px >> 8) + (py >> 8) * (width >> 8);
            let entry_addr =
                screen_base + block * 0x800 + (((py & 255) / 8) * 32 + (px & 255) / 8) * 2;
            let entry = self.vram16(entry_addr);
            let tile = (entry & 0x3FF) as usize;
            let tx = if entry & 0x400 != 0 { 7 - (px & 7) } else { px & 7 };
            let ty = if entry & 0x800 != 0 { 7 - (py & 7) } else { py & 7 };

            let index = if bpp8 {
                let addr = char_base + tile * 64 + ty * 8 + tx;
                if addr >= 0x10000 {
                    continue;
                }
                self.vram8(addr) as usize
            } else {
                let addr = char_base + tile * 32 + ty * 4 + tx / 2;
                if addr >= 0x10000 {
                    continue;
                }
                let nibble = (self.vram8(addr) >> ((tx & 1) * 4)) & 0xF;
                if nibble == 0 {
                    continue;
                }
                (entry >> 12) as usize * 16 + nibble as usize
            };
            if index != 0 {
                *pixel = self.palette16(index * 2);
            }
        }
    }

    /// Texture coordinate for screen column `x` on an affine layer.
    fn affine_coords(&self, idx: usize, x: usize, mosaic: bool) -> (i32, i32) {
        let a = &self.affine[idx - 2];
        let x = (if mosaic { x - x % self.bg_mosaic().0 } else { x }) as i32;
        (
            a.cur_x.wrapping_add(a.pa as i32 * x) >> 8,
            a.cur_y.wrapping_add(a.pc as i32 * x) >> 8,
        )
    }

    fn affine_line(&self, idx: usize, out: &mut Line) {
        let cnt = self.bg[idx].cnt;
        let char_base = ((cnt >> 2) & 3) as usize * 0x4000;
        let screen_base = ((cnt >> 8) & 0x1F) as usize * 0x800;
        let size = 128i32 << (cnt >> 14);
        let wrap = cnt & 0x2000 != 0;
        let mosaic = cnt & 0x40 != 0;

        for (x, pixel) in out.iter_mut().enumerate() {
            let (mut tx, mut ty) = self.affine_coords(idx, x, mosaic);
            if wrap {
                tx = tx.rem_euclid(size);
                ty = ty.rem_euclid(size);
            } else if !(0..size).contains(&tx) || !(0..size).contains(&ty) {
                continue;
            }
            let (tx, ty) = (tx as usize, ty as usize);
            let tiles_per_row = size as usize / 8;
            let tile = self.vram8(screen_base + (ty / 8) * tiles_per_row + tx / 8) as usize;
            let index = self.vram8(char_base + tile * 64 + (ty & 7) * 8 + (tx & 7));
            if index != 0 {
                *pixel = self.palette16(index as usize * 2);
            }
        }
    }

    fn bitmap_line(&self, out: &mut Line) {
        let mode = self.mode();
        let frame = if mode != 3 && self.dispcnt & 0x10 != 0 { 0xA000 } else { 0 };
        let (width, height) = if mode == 5 { (160, 128) } else { (240, 160) };
        let mosaic = self.bg[2].cnt & 0x40 != 0;

        for (x, pixel) in out.iter_mut().enumerate() {
            let (tx, ty) = self.affine_coords(2, x, mosaic);
            if !(0..width).contains(&tx) || !(0..height).contains(&ty) {
                continue;
            }
            let offset = (ty * width + tx) as usize;
            *pixel = if mode == 4 {
                let index = self.vram8(frame + offset);
                if index == 0 {
                    continue;
                }
                self.palette16(index as usize * 2)
            } else {
                self.vram16(frame + offset * 2) & 0x7FFF
            };
        }
    }
}
