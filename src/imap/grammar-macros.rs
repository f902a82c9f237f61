//-
// Copyright (c) 2023, Jason Lingle
//
// This file is part of Polliwog.
//
// Polliwog is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Polliwog is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Polliwog. If not, see <http://www.gnu.org/licenses/>.

// This file is include!()d into `syntax.rs`.
//
// `wire_rule!` binds a struct or enum to the wire syntax it represents.
// Every field (or enum case) carries a *shape*, a parenthesized expression
// that drives both the parser and the writer, so the two can never drift
// apart. Shapes nest outside-in:
//
//   (p writer parser)        primitive: LexWriter method + parser function
//   (sub Type)               nested rule, Type::parse / Type::write_to
//   (text "X")               fixed text, case-insensitive on read, maps ()
//   (flagged "X")            optional fixed text, maps bool
//   (lead "X" inner)         "X" before the inner shape
//   (trail "X" inner)        "X" after the inner shape
//   (wrap "A" "B" inner)     delimited by "A" and "B"
//   (wrap_opt "A" "B" inner) delimiters optional on read, written on write
//   (maybe inner)            Option, nothing when absent
//   (nil_or inner)           Option, NIL when absent
//   (nil_default inner)      NIL reads as Default, empty writes as NIL
//   (marked "X" inner)       Option, the marker "X" when absent
//   (boxed inner)            Box
//   (many0 inner) (many1 inner)          repetition, no separator
//   (list0 "S" inner) (list1 "S" inner)  repetition separated by "S"
//
// A rule is introduced by a frame — `[]`, `[lead "X "]`, or
// `[wrap "(" ")"]` — giving the syntax around the whole production.
//
// The generated parser is a chain of `let (i, field) = ...?` steps rather
// than one combinator expression; enum rules try their cases in order with
// explicit early returns, which also sidesteps `alt()`'s tuple-size cap.
// Rules whose fields borrow nothing are declared without a lifetime, so no
// phantom markers are needed anywhere.
//
// `keyword_enum!` is the degenerate case: a C-like enum driven entirely by
// one keyword table used for both directions.

macro_rules! wire_rule {
    ([$($frame:tt)*]
     pub struct $name:ident<$lt:lifetime> {
         $($(#[$fattr:meta])*
           $field:ident: $fty:ty => $shape:tt,)+
    }) => {
        #[derive(Debug, PartialEq, Eq)]
        pub struct $name<$lt> {
            $($(#[$fattr])* pub $field: $fty,)+
        }

        impl<$lt> $name<$lt> {
            pub fn parse(i: &$lt [u8]) -> IResult<&$lt [u8], Self> {
                let i = wire_frame_open!([$($frame)*], i)?;
                $(let (i, $field) = shape_parser!($shape)(i)?;)+
                let (i, ()) = wire_frame_close!([$($frame)*], i)?;
                Ok((i, $name { $($field,)+ }))
            }

            pub fn write_to(
                &mut self,
                out: &mut LexWriter<impl LexOutput>,
            ) -> io::Result<()> {
                wire_frame_write_open!([$($frame)*], out);
                $(shape_writer!($shape, out, (&mut self.$field));)+
                wire_frame_write_close!([$($frame)*], out);
                Ok(())
            }
        }
    };

    ([$($frame:tt)*]
     pub struct $name:ident {
         $($(#[$fattr:meta])*
           $field:ident: $fty:ty => $shape:tt,)+
    }) => {
        #[derive(Debug, PartialEq, Eq)]
        pub struct $name {
            $($(#[$fattr])* pub $field: $fty,)+
        }

        impl $name {
            pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
                let i = wire_frame_open!([$($frame)*], i)?;
                $(let (i, $field) = shape_parser!($shape)(i)?;)+
                let (i, ()) = wire_frame_close!([$($frame)*], i)?;
                Ok((i, $name { $($field,)+ }))
            }

            pub fn write_to(
                &mut self,
                out: &mut LexWriter<impl LexOutput>,
            ) -> io::Result<()> {
                wire_frame_write_open!([$($frame)*], out);
                $(shape_writer!($shape, out, (&mut self.$field));)+
                wire_frame_write_close!([$($frame)*], out);
                Ok(())
            }
        }
    };

    ([$($frame:tt)*]
     pub enum $name:ident<$lt:lifetime> {
         $($(#[$cattr:meta])*
           $case:ident($cty:ty) => $shape:tt,)+
    }) => {
        #[derive(Debug, PartialEq, Eq)]
        pub enum $name<$lt> {
            $($(#[$cattr])* $case($cty),)+
        }

        impl<$lt> $name<$lt> {
            pub fn parse(i: &$lt [u8]) -> IResult<&$lt [u8], Self> {
                let i = wire_frame_open!([$($frame)*], i)?;
                fn close_frame<'x>(rest: &'x [u8]) -> IResult<&'x [u8], ()> {
                    wire_frame_close!([$($frame)*], rest)
                }
                $({
                    let attempt: IResult<&$lt [u8], $cty> =
                        shape_parser!($shape)(i);
                    if let Ok((rest, value)) = attempt {
                        let close = close_frame(rest);
                        if let Ok((rest, ())) = close {
                            return Ok((rest, $name::$case(value)));
                        }
                    }
                })+
                Err(nom::Err::Error(nom::error::Error::new(
                    i,
                    nom::error::ErrorKind::Alt,
                )))
            }

            pub fn write_to(
                &mut self,
                out: &mut LexWriter<impl LexOutput>,
            ) -> io::Result<()> {
                wire_frame_write_open!([$($frame)*], out);
                match *self {
                    $($name::$case(ref mut value) => {
                        shape_writer!($shape, out, value);
                    },)+
                }
                wire_frame_write_close!([$($frame)*], out);
                Ok(())
            }
        }
    };

    ([$($frame:tt)*]
     pub enum $name:ident {
         $($(#[$cattr:meta])*
           $case:ident($cty:ty) => $shape:tt,)+
    }) => {
        #[derive(Debug, PartialEq, Eq)]
        pub enum $name {
            $($(#[$cattr])* $case($cty),)+
        }

        impl $name {
            pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
                let i = wire_frame_open!([$($frame)*], i)?;
                fn close_frame<'x>(rest: &'x [u8]) -> IResult<&'x [u8], ()> {
                    wire_frame_close!([$($frame)*], rest)
                }
                $({
                    let attempt: IResult<&[u8], $cty> =
                        shape_parser!($shape)(i);
                    if let Ok((rest, value)) = attempt {
                        let close = close_frame(rest);
                        if let Ok((rest, ())) = close {
                            return Ok((rest, $name::$case(value)));
                        }
                    }
                })+
                Err(nom::Err::Error(nom::error::Error::new(
                    i,
                    nom::error::ErrorKind::Alt,
                )))
            }

            pub fn write_to(
                &mut self,
                out: &mut LexWriter<impl LexOutput>,
            ) -> io::Result<()> {
                wire_frame_write_open!([$($frame)*], out);
                match *self {
                    $($name::$case(ref mut value) => {
                        shape_writer!($shape, out, value);
                    },)+
                }
                wire_frame_write_close!([$($frame)*], out);
                Ok(())
            }
        }
    };
}

macro_rules! wire_frame_open {
    ([], $i:expr) => {
        Ok::<_, nom::Err<nom::error::Error<&[u8]>>>($i)
    };
    ([lead $p:literal], $i:expr) => {
        kw($p)($i).map(|(rest, _)| rest)
    };
    ([wrap $a:literal $b:literal], $i:expr) => {
        kw($a)($i).map(|(rest, _)| rest)
    };
}

macro_rules! wire_frame_close {
    ([], $i:expr) => {
        Ok::<_, nom::Err<nom::error::Error<&[u8]>>>(($i, ()))
    };
    ([lead $p:literal], $i:expr) => {
        Ok::<_, nom::Err<nom::error::Error<&[u8]>>>(($i, ()))
    };
    ([wrap $a:literal $b:literal], $i:expr) => {
        kw($b)($i).map(|(rest, _)| (rest, ()))
    };
}

macro_rules! wire_frame_write_open {
    ([], $out:expr) => {};
    ([lead $p:literal], $out:expr) => {
        $out.raw($p)?;
    };
    ([wrap $a:literal $b:literal], $out:expr) => {
        $out.raw($a)?;
    };
}

macro_rules! wire_frame_write_close {
    ([], $out:expr) => {};
    ([lead $p:literal], $out:expr) => {};
    ([wrap $a:literal $b:literal], $out:expr) => {
        $out.raw($b)?;
    };
}

macro_rules! shape_parser {
    ((text $t:literal)) => {
        map(kw($t), |_| ())
    };
    ((flagged $t:literal)) => {
        map(opt(kw($t)), |found| found.is_some())
    };
    ((p $w:ident $r:ident)) => {
        $r
    };
    ((sub $ty:ty)) => {
        <$ty>::parse
    };
    ((lead $p:literal $inner:tt)) => {
        sequence::preceded(kw($p), shape_parser!($inner))
    };
    ((trail $s:literal $inner:tt)) => {
        sequence::terminated(shape_parser!($inner), kw($s))
    };
    ((wrap $a:literal $b:literal $inner:tt)) => {
        sequence::delimited(kw($a), shape_parser!($inner), kw($b))
    };
    ((wrap_opt $a:literal $b:literal $inner:tt)) => {
        alt((
            sequence::delimited(kw($a), shape_parser!($inner), kw($b)),
            shape_parser!($inner),
        ))
    };
    ((maybe $inner:tt)) => {
        opt(shape_parser!($inner))
    };
    ((nil_or $inner:tt)) => {
        alt((
            map(kw("NIL"), |_| None),
            map(shape_parser!($inner), Some),
        ))
    };
    ((nil_default $inner:tt)) => {
        alt((
            map(kw("NIL"), |_| Default::default()),
            shape_parser!($inner),
        ))
    };
    ((marked $m:literal $inner:tt)) => {
        alt((
            map(kw($m), |_| None),
            map(shape_parser!($inner), Some),
        ))
    };
    ((boxed $inner:tt)) => {
        map(shape_parser!($inner), Box::new)
    };
    ((many0 $inner:tt)) => {
        multi::many0(shape_parser!($inner))
    };
    ((many1 $inner:tt)) => {
        multi::many1(shape_parser!($inner))
    };
    ((list0 $sep:literal $inner:tt)) => {
        multi::separated_list0(kw($sep), shape_parser!($inner))
    };
    ((list1 $sep:literal $inner:tt)) => {
        multi::separated_list1(kw($sep), shape_parser!($inner))
    };
}

macro_rules! shape_writer {
    ((text $t:literal), $out:expr, $v:expr) => {{
        let _ = $v;
        $out.raw($t)?;
    }};
    ((flagged $t:literal), $out:expr, $v:expr) => {
        if *$v {
            $out.raw($t)?;
        }
    };
    ((p $w:ident $r:ident), $out:expr, $v:expr) => {
        $out.$w($v)?;
    };
    ((sub $ty:ty), $out:expr, $v:expr) => {
        $v.write_to($out)?;
    };
    ((lead $p:literal $inner:tt), $out:expr, $v:expr) => {
        $out.raw($p)?;
        shape_writer!($inner, $out, $v);
    };
    ((trail $s:literal $inner:tt), $out:expr, $v:expr) => {
        shape_writer!($inner, $out, $v);
        $out.raw($s)?;
    };
    ((wrap $a:literal $b:literal $inner:tt), $out:expr, $v:expr) => {
        $out.raw($a)?;
        shape_writer!($inner, $out, $v);
        $out.raw($b)?;
    };
    // The unambiguous delimited form is the one we always produce.
    ((wrap_opt $a:literal $b:literal $inner:tt), $out:expr, $v:expr) => {
        $out.raw($a)?;
        shape_writer!($inner, $out, $v);
        $out.raw($b)?;
    };
    ((maybe $inner:tt), $out:expr, $v:expr) => {
        if let Some(ref mut value) = *$v {
            shape_writer!($inner, $out, value);
        }
    };
    ((nil_or $inner:tt), $out:expr, $v:expr) => {
        match *$v {
            None => $out.nil()?,
            Some(ref mut value) => {
                shape_writer!($inner, $out, value);
            },
        }
    };
    ((nil_default $inner:tt), $out:expr, $v:expr) => {
        if $v.is_empty() {
            $out.nil()?;
        } else {
            shape_writer!($inner, $out, $v);
        }
    };
    ((marked $m:literal $inner:tt), $out:expr, $v:expr) => {
        match *$v {
            None => $out.raw($m)?,
            Some(ref mut value) => {
                shape_writer!($inner, $out, value);
            },
        }
    };
    ((boxed $inner:tt), $out:expr, $v:expr) => {{
        let value = &mut **$v;
        shape_writer!($inner, $out, value);
    }};
    ((many0 $inner:tt), $out:expr, $v:expr) => {
        for value in $v.iter_mut() {
            shape_writer!($inner, $out, value);
        }
    };
    ((many1 $inner:tt), $out:expr, $v:expr) => {
        for value in $v.iter_mut() {
            shape_writer!($inner, $out, value);
        }
    };
    ((list0 $sep:literal $inner:tt), $out:expr, $v:expr) => {
        for (ix, value) in $v.iter_mut().enumerate() {
            if 0 != ix {
                $out.raw($sep)?;
            }
            shape_writer!($inner, $out, value);
        }
    };
    ((list1 $sep:literal $inner:tt), $out:expr, $v:expr) => {
        shape_writer!((list0 $sep $inner), $out, $v);
    };
}

macro_rules! keyword_enum {
    (pub enum $name:ident {
         $($case:ident = $text:literal,)+
    }) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $($case,)+
        }

        impl $name {
            /// Keyword table, in match-priority order: where one keyword
            /// is a prefix of another, the longer must come first.
            const KEYWORDS: &'static [(&'static str, $name)] =
                &[$(($text, $name::$case),)+];

            pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
                for &(text, value) in Self::KEYWORDS {
                    let attempt: IResult<&[u8], &[u8]> = kw(text)(i);
                    if let Ok((rest, _)) = attempt {
                        return Ok((rest, value));
                    }
                }

                Err(nom::Err::Error(nom::error::Error::new(
                    i,
                    nom::error::ErrorKind::Alt,
                )))
            }

            pub fn write_to(
                &self,
                out: &mut LexWriter<impl LexOutput>,
            ) -> io::Result<()> {
                let text = Self::KEYWORDS
                    .iter()
                    .find(|&&(_, value)| value == *self)
                    .map(|&(text, _)| text)
                    .expect("keyword missing from table");
                out.raw(text)
            }
        }
    }
}
