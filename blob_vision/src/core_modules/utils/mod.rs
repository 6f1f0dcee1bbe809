pub mod yuv_file;
